//! Interval/displacement gate applied between consecutive fixes.
//!
//! Platform providers enforce this themselves; adapters for sources that
//! stream raw fixes (and the mock provider) run fixes through a
//! [`FixThrottle`] so observers see the same cadence.

use std::time::Duration;

use crate::{Coordinate, UpdateRequest};

/// Admits a fix when both the minimum interval has elapsed and the minimum
/// displacement has been covered since the last admitted fix.
#[derive(Debug, Clone)]
pub struct FixThrottle {
    min_interval_ms: i64,
    min_displacement: f64,
    last: Option<Coordinate>,
}

impl FixThrottle {
    pub fn new(min_interval: Duration, min_displacement: f64) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval.as_millis()).unwrap_or(i64::MAX),
            min_displacement: min_displacement.max(0.0),
            last: None,
        }
    }

    pub fn from_request(request: &UpdateRequest) -> Self {
        Self::new(request.min_interval, request.min_displacement)
    }

    /// Decide whether `fix` is delivered, recording it when it is.
    ///
    /// A fix without a timestamp (or following one without) is judged on
    /// displacement alone. Invalid fixes are rejected and never become the
    /// reference for later fixes.
    pub fn admit(&mut self, fix: &Coordinate) -> bool {
        if !fix.is_valid() {
            return false;
        }

        let admitted = match &self.last {
            None => true,
            Some(last) => {
                let interval_ok = match (last.timestamp_millis, fix.timestamp_millis) {
                    (Some(prev), Some(now)) => now.saturating_sub(prev) >= self.min_interval_ms,
                    _ => true,
                };
                interval_ok && last.distance_to(fix) >= self.min_displacement
            }
        };

        if admitted {
            self.last = Some(*fix);
        }
        admitted
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    // ~111m north per step
    fn fix(step: u32, at_ms: i64) -> Coordinate {
        Coordinate::new(51.5074 + step as f64 * 0.001, -0.1278).with_timestamp(at_ms)
    }

    #[test]
    fn test_first_fix_always_admitted() {
        let mut throttle = FixThrottle::new(Duration::from_secs(60), 1000.0);
        assert!(throttle.admit(&fix(0, 0)));
        // Anything close behind the first fix is held back
        assert!(!throttle.admit(&fix(0, 1000)));
    }

    #[test]
    fn test_interval_enforced() {
        let mut throttle = FixThrottle::new(Duration::from_millis(5000), 10.0);
        assert!(throttle.admit(&fix(0, 0)));
        // Far enough but too soon
        assert!(!throttle.admit(&fix(1, 1000)));
        // Far enough and late enough
        assert!(throttle.admit(&fix(2, 6000)));
    }

    #[test]
    fn test_displacement_enforced() {
        let mut throttle = FixThrottle::new(Duration::from_millis(5000), 10.0);
        assert!(throttle.admit(&fix(0, 0)));
        // Late enough but stationary
        assert!(!throttle.admit(&fix(0, 10_000)));
        assert!(throttle.admit(&fix(1, 20_000)));
    }

    #[test]
    fn test_rejected_fix_does_not_move_reference() {
        let mut throttle = FixThrottle::new(Duration::from_millis(5000), 10.0);
        assert!(throttle.admit(&fix(0, 0)));
        assert!(!throttle.admit(&fix(1, 1000)));
        // 5s after the first fix, though only 4s after the rejected one
        assert!(throttle.admit(&fix(2, 5000)));
    }

    #[test]
    fn test_missing_timestamp_uses_displacement() {
        let mut throttle = FixThrottle::new(Duration::from_millis(5000), 10.0);
        assert!(throttle.admit(&Coordinate::new(51.5074, -0.1278)));
        assert!(!throttle.admit(&Coordinate::new(51.5074, -0.1278)));
        assert!(throttle.admit(&Coordinate::new(51.5084, -0.1278)));
    }

    #[test]
    fn test_zero_thresholds_admit_everything() {
        let mut throttle = FixThrottle::new(Duration::ZERO, 0.0);
        assert!(throttle.admit(&fix(0, 0)));
        assert!(throttle.admit(&fix(0, 0)));
    }

    #[test]
    fn test_invalid_fix_rejected_without_becoming_reference() {
        let mut throttle = FixThrottle::new(Duration::from_millis(5000), 10.0);
        let garbage = Coordinate::new(f64::NAN, -0.1278).with_timestamp(0);
        assert!(!throttle.admit(&garbage));
        assert!(!throttle.admit(&Coordinate::new(91.0, 0.0).with_timestamp(0)));

        // Valid fixes behave as if the garbage never arrived
        assert!(throttle.admit(&fix(0, 1000)));
        assert!(throttle.admit(&fix(1, 6000)));
    }
}
