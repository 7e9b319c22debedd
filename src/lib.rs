//! # Location Bridge
//!
//! Location-update subscription service for mobile hosts.
//!
//! This library provides:
//! - A subscription service owning zero-or-one registration with a
//!   platform positioning provider, fanning fixes out to observers
//! - A typed message-channel protocol (requests, responses, push events)
//!   for the UI layer
//! - A mock provider for tests and desktop runs
//!
//! ## Features
//!
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`async`** - Expose service events as a tokio channel
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use location_bridge::{Coordinate, LocationSubscriptionService, MockProvider, UpdateOptions};
//!
//! let provider = Arc::new(MockProvider::new());
//! let service = LocationSubscriptionService::new(provider.clone());
//!
//! service.add_observer(|fix: &Coordinate| {
//!     println!("Lat: {}, Lon: {}", fix.latitude, fix.longitude);
//! });
//!
//! let handle = service.start(UpdateOptions::default()).unwrap();
//! provider.emit(Coordinate::new(51.5074, -0.1278));
//! service.stop(handle);
//! ```

use std::time::Duration;

use geo::{Distance, Haversine, Point};

// Unified error handling
pub mod error;
pub use error::{LocationError, Result};

// Provider seam (platform positioning service)
pub mod provider;
pub use provider::{LocationListener, PositioningProvider, RegistrationId, UpdateRequest};

// Interval/displacement rule enforced by providers
pub mod throttle;
pub use throttle::FixThrottle;

// Subscription lifecycle and observer fan-out
pub mod service;
pub use service::{LocationObserver, LocationSubscriptionService, ObserverId};

// Message channel protocol exposed to the UI layer
pub mod channel;
pub use channel::{ChannelEvent, ChannelRequest, ChannelResponse, EventSink, MethodCall};

// Channel <-> service bridge
pub mod bridge;
pub use bridge::{BridgeConfig, LocationChannel};

// In-process fake provider
pub mod mock;
pub use mock::MockProvider;

// Tokio channel adapter for service events
#[cfg(feature = "async")]
pub mod stream;
#[cfg(feature = "async")]
pub use stream::{subscribe_events, ServiceEvent};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("LocationBridgeRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A single position fix reported by a provider.
///
/// # Example
/// ```
/// use location_bridge::Coordinate;
/// let fix = Coordinate::new(51.5074, -0.1278).with_timestamp(1_700_000_000_000);
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time in milliseconds since the Unix epoch, when the provider reports it
    pub timestamp_millis: Option<i64>,
}

impl Coordinate {
    /// Create a fix without a timestamp.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = Some(timestamp_millis);
        self
    }

    /// Check if the fix has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Great-circle distance to another fix in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        Haversine::distance(
            Point::new(self.longitude, self.latitude),
            Point::new(other.longitude, other.latitude),
        )
    }
}

/// Enabled state of a positioning provider, as toggled by the user or OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ProviderState {
    Enabled,
    Disabled,
}

impl ProviderState {
    pub fn is_enabled(self) -> bool {
        self == ProviderState::Enabled
    }
}

/// Opaque identifier of one registration with the provider.
///
/// Returned by [`LocationSubscriptionService::start`] and required by
/// [`LocationSubscriptionService::stop`]. Never reused within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub(crate) fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub(crate) fn generation(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Thresholds for a subscription.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct UpdateOptions {
    /// Name of the positioning provider to register with.
    /// Default: "gps"
    pub provider: String,

    /// Minimum time between delivered fixes.
    /// Default: 5 seconds
    pub min_interval: Duration,

    /// Minimum distance between delivered fixes, in meters.
    /// Default: 10.0 meters
    pub min_displacement: f64,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            provider: GPS_PROVIDER.to_string(),
            min_interval: Duration::from_millis(5000),
            min_displacement: 10.0,
        }
    }
}

/// Satellite positioning provider name.
pub const GPS_PROVIDER: &str = "gps";

// ============================================================================
// Tests
// ============================================================================
