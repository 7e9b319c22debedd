//! # Location Subscription Service
//!
//! Owns zero-or-one active registration with the injected
//! [`PositioningProvider`] and fans every fix out to registered observers.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped --start--> Active --stop--> Stopped
//!                    Active --start--> Active   (previous registration removed first)
//! ```
//!
//! Callbacks fire only while Active.
//!
//! ## Delivery
//!
//! Each registration gets a listener stamped with its generation. Delivery
//! holds the read side of a barrier and drops the callback unless the
//! listener's generation is still current. `stop` clears the generation and
//! then takes the write side, so once it returns no callback for the stopped
//! handle is running or will run. A `stop` issued from inside one of this
//! service's own observer callbacks only clears the generation; stopping a
//! different service from a callback still waits for that service.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use log::{debug, info, warn};

use crate::provider::{LocationListener, PositioningProvider, RegistrationId, UpdateRequest};
use crate::{Coordinate, ProviderState, Result, SubscriptionHandle, UpdateOptions};

// Generation value meaning "no active subscription"
const STOPPED: u64 = 0;

thread_local! {
    // Services whose observers are running on this thread, innermost last
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

// ============================================================================
// Observers
// ============================================================================

/// Consumer of fixes and provider status changes.
///
/// Returning an error (or panicking) affects only that one invocation: the
/// failure is logged and the subscription keeps running.
pub trait LocationObserver: Send + Sync {
    fn on_update(&self, fix: &Coordinate) -> Result<()>;

    /// Advisory. Defaults to ignoring the change.
    fn on_provider_status_changed(&self, _provider: &str, _state: ProviderState) -> Result<()> {
        Ok(())
    }
}

/// Closures observe fixes only.
impl<F> LocationObserver for F
where
    F: Fn(&Coordinate) + Send + Sync,
{
    fn on_update(&self, fix: &Coordinate) -> Result<()> {
        self(fix);
        Ok(())
    }
}

/// Identifier of a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverList = Vec<(ObserverId, Arc<dyn LocationObserver>)>;

// ============================================================================
// Shared delivery state
// ============================================================================

struct Shared {
    current: AtomicU64,
    barrier: RwLock<()>,
    observers: RwLock<ObserverList>,
    next_observer: AtomicU64,
}

impl Shared {
    fn deliver<F>(&self, generation: u64, kind: &str, notify: F)
    where
        F: Fn(&dyn LocationObserver) -> Result<()>,
    {
        let _barrier = self.barrier.read().unwrap_or_else(PoisonError::into_inner);
        if self.current.load(Ordering::Acquire) != generation {
            debug!(
                "[LocationService] Dropping {} for stale subscription sub-{}",
                kind, generation
            );
            return;
        }

        let observers: ObserverList = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let _scope = DeliveryScope::enter(self);
        for (id, observer) in observers {
            match catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "[LocationService] Observer {:?} failed on {}: {}",
                        id, kind, e
                    );
                }
                Err(_) => {
                    warn!("[LocationService] Observer {:?} panicked on {}", id, kind);
                }
            }
        }
    }
}

/// Marks the current thread as inside one service's observer callbacks.
///
/// Services are keyed by the address of their `Shared`, which is stable for
/// as long as a delivery holds it.
struct DeliveryScope {
    key: usize,
}

impl DeliveryScope {
    fn enter(shared: &Shared) -> Self {
        let key = Self::key(shared);
        DELIVERING.with(|d| d.borrow_mut().push(key));
        DeliveryScope { key }
    }

    /// True when the current thread is delivering for `shared`.
    fn active_for(shared: &Shared) -> bool {
        let key = Self::key(shared);
        DELIVERING.with(|d| d.borrow().contains(&key))
    }

    fn key(shared: &Shared) -> usize {
        shared as *const Shared as usize
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|d| {
            let mut stack = d.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|k| *k == self.key) {
                stack.remove(pos);
            }
        });
    }
}

/// Listener registered with the provider for one generation.
struct SubscriptionListener {
    generation: u64,
    shared: Weak<Shared>,
}

impl LocationListener for SubscriptionListener {
    fn on_location_changed(&self, fix: Coordinate) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver(self.generation, "update", |observer| observer.on_update(&fix));
        }
    }

    fn on_provider_enabled(&self, provider: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver(self.generation, "provider status", |observer| {
                observer.on_provider_status_changed(provider, ProviderState::Enabled)
            });
        }
    }

    fn on_provider_disabled(&self, provider: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.deliver(self.generation, "provider status", |observer| {
                observer.on_provider_status_changed(provider, ProviderState::Disabled)
            });
        }
    }
}

// ============================================================================
// Service
// ============================================================================

struct ActiveSubscription {
    handle: SubscriptionHandle,
    registration: RegistrationId,
    options: UpdateOptions,
}

struct State {
    active: Option<ActiveSubscription>,
    next_generation: u64,
}

/// Manages the subscription to one positioning provider.
pub struct LocationSubscriptionService {
    provider: Box<dyn PositioningProvider>,
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl LocationSubscriptionService {
    /// Create a stopped service around an injected provider.
    pub fn new<P: PositioningProvider + 'static>(provider: P) -> Self {
        Self {
            provider: Box::new(provider),
            shared: Arc::new(Shared {
                current: AtomicU64::new(STOPPED),
                barrier: RwLock::new(()),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
            state: Mutex::new(State {
                active: None,
                next_generation: STOPPED,
            }),
        }
    }

    // ========================================================================
    // Subscription Lifecycle
    // ========================================================================

    /// Register with the provider and start delivering fixes.
    ///
    /// An already-active subscription is stopped before the new one is
    /// registered. If registration then fails the service is left stopped.
    ///
    /// # Errors
    /// [`LocationError::PermissionDenied`](crate::LocationError::PermissionDenied) or
    /// [`LocationError::ProviderUnavailable`](crate::LocationError::ProviderUnavailable)
    /// as reported by the provider. No handle exists afterwards and no
    /// callback fires.
    pub fn start(&self, options: UpdateOptions) -> Result<SubscriptionHandle> {
        let (result, replaced) = {
            let mut state = self.lock_state();

            let replaced = match state.active.take() {
                Some(previous) => {
                    info!(
                        "[LocationService] Replacing active subscription {}",
                        previous.handle
                    );
                    self.release(previous);
                    true
                }
                None => false,
            };

            state.next_generation += 1;
            let handle = SubscriptionHandle::new(state.next_generation);
            let listener = Arc::new(SubscriptionListener {
                generation: handle.generation(),
                shared: Arc::downgrade(&self.shared),
            });

            // Current before registering so the first fix is not dropped
            self.shared
                .current
                .store(handle.generation(), Ordering::Release);

            let request = UpdateRequest::from(&options);
            let result = match self.provider.request_updates(&request, listener) {
                Ok(registration) => {
                    info!(
                        "[LocationService] Started {} on '{}' ({:?}, {:.0}m)",
                        handle, options.provider, options.min_interval, options.min_displacement
                    );
                    state.active = Some(ActiveSubscription {
                        handle,
                        registration,
                        options,
                    });
                    Ok(handle)
                }
                Err(e) => {
                    self.shared.current.store(STOPPED, Ordering::Release);
                    warn!("[LocationService] Could not start location updates: {}", e);
                    Err(e)
                }
            };
            (result, replaced)
        };

        if replaced {
            self.wait_for_deliveries();
        }
        result
    }

    /// Unregister `handle`. Stale, unknown, or already-stopped handles are a
    /// no-op.
    pub fn stop(&self, handle: SubscriptionHandle) {
        let stopped = {
            let mut state = self.lock_state();
            if state.active.as_ref().map(|a| a.handle) == Some(handle) {
                state.active.take()
            } else {
                None
            }
        };

        match stopped {
            Some(active) => {
                self.release(active);
                self.wait_for_deliveries();
            }
            None => debug!("[LocationService] stop({}) ignored: not active", handle),
        }
    }

    /// Stop whatever subscription is active. Runs on drop.
    pub fn shutdown(&self) {
        let stopped = self.lock_state().active.take();
        if let Some(active) = stopped {
            info!("[LocationService] Shutting down {}", active.handle);
            self.release(active);
            self.wait_for_deliveries();
        }
    }

    /// Handle of the active subscription, if any.
    pub fn active_handle(&self) -> Option<SubscriptionHandle> {
        match self.shared.current.load(Ordering::Acquire) {
            STOPPED => None,
            generation => Some(SubscriptionHandle::new(generation)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_handle().is_some()
    }

    /// Options of the active subscription.
    pub fn options(&self) -> Option<UpdateOptions> {
        self.lock_state().active.as_ref().map(|a| a.options.clone())
    }

    // ========================================================================
    // Observer Management
    // ========================================================================

    /// Register an observer for all subsequent deliveries.
    pub fn add_observer<O: LocationObserver + 'static>(&self, observer: O) -> ObserverId {
        self.add_shared_observer(Arc::new(observer))
    }

    /// Register an observer that is also held elsewhere.
    pub fn add_shared_observer(&self, observer: Arc<dyn LocationObserver>) -> ObserverId {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::Relaxed));
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        debug!("[LocationService] Added observer {:?}", id);
        id
    }

    /// Returns false when the id is unknown.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self
            .shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.shared
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, active: ActiveSubscription) {
        let _ = self.shared.current.compare_exchange(
            active.handle.generation(),
            STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.provider.remove_updates(active.registration);
        info!("[LocationService] Stopped {}", active.handle);
    }

    /// Wait until no delivery that passed the generation check is running.
    ///
    /// Skipped when called from this service's own callback, which holds the
    /// read side.
    fn wait_for_deliveries(&self) {
        if DeliveryScope::active_for(&self.shared) {
            return;
        }
        drop(
            self.shared
                .barrier
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

impl Drop for LocationSubscriptionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocationError, MockProvider};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<Coordinate>>>;

    fn sample_fix(step: u32) -> Coordinate {
        Coordinate::new(51.5074 + step as f64 * 0.001, -0.1278)
            .with_timestamp(step as i64 * 10_000)
    }

    fn recording_service() -> (Arc<MockProvider>, LocationSubscriptionService, Seen) {
        let provider = Arc::new(MockProvider::new());
        let service = LocationSubscriptionService::new(provider.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service.add_observer(move |fix: &Coordinate| sink.lock().unwrap().push(*fix));
        (provider, service, seen)
    }

    #[test]
    fn test_start_and_deliver() {
        let (provider, service, seen) = recording_service();
        let handle = service.start(UpdateOptions::default()).unwrap();

        assert!(service.is_active());
        assert_eq!(service.active_handle(), Some(handle));
        assert_eq!(provider.registration_count(), 1);

        provider.emit(sample_fix(0));
        provider.emit(sample_fix(1));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stop_unregisters() {
        let (provider, service, seen) = recording_service();
        let handle = service.start(UpdateOptions::default()).unwrap();
        service.stop(handle);

        assert!(!service.is_active());
        assert_eq!(provider.registration_count(), 0);
        provider.emit(sample_fix(0));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_provider, service, _seen) = recording_service();
        let handle = service.start(UpdateOptions::default()).unwrap();
        service.stop(handle);
        service.stop(handle);
        service.stop(SubscriptionHandle::new(999));
        assert!(!service.is_active());
    }

    #[test]
    fn test_stale_handle_does_not_stop_current() {
        let (provider, service, _seen) = recording_service();
        let first = service.start(UpdateOptions::default()).unwrap();
        let second = service.start(UpdateOptions::default()).unwrap();
        assert_ne!(first, second);

        service.stop(first);
        assert_eq!(service.active_handle(), Some(second));
        assert_eq!(provider.registration_count(), 1);
    }

    #[test]
    fn test_permission_denied() {
        let (provider, service, seen) = recording_service();
        provider.set_permission_granted(false);

        let err = service.start(UpdateOptions::default()).unwrap_err();
        assert!(matches!(err, LocationError::PermissionDenied { .. }));
        assert!(!service.is_active());
        assert_eq!(provider.registration_count(), 0);

        provider.emit(sample_fix(0));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_observer_is_isolated() {
        let (provider, service, seen) = recording_service();

        struct Failing;
        impl LocationObserver for Failing {
            fn on_update(&self, _fix: &Coordinate) -> Result<()> {
                Err(LocationError::delivery("ui detached"))
            }
        }
        service.add_observer(Failing);
        service.add_observer(|_: &Coordinate| panic!("observer bug"));

        service.start(UpdateOptions::default()).unwrap();
        provider.emit(sample_fix(0));
        provider.emit(sample_fix(1));

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(service.is_active());
    }

    #[test]
    fn test_remove_observer() {
        let (provider, service, _seen) = recording_service();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = service.add_observer(move |_: &Coordinate| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(service.observer_count(), 2);

        service.start(UpdateOptions::default()).unwrap();
        provider.emit(sample_fix(0));
        assert!(service.remove_observer(id));
        assert!(!service.remove_observer(id));
        provider.emit(sample_fix(1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_from_inside_observer() {
        let provider = Arc::new(MockProvider::new());
        let service = Arc::new(LocationSubscriptionService::new(provider.clone()));
        let count = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&service);
        let counter = count.clone();
        service.add_observer(move |_: &Coordinate| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(service) = weak.upgrade() {
                if let Some(handle) = service.active_handle() {
                    service.stop(handle);
                }
            }
        });

        service.start(UpdateOptions::default()).unwrap();
        provider.emit(sample_fix(0));
        provider.emit(sample_fix(1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!service.is_active());
    }

    #[test]
    fn test_stop_other_service_from_callback_waits() {
        let provider_a = Arc::new(MockProvider::new());
        let provider_b = Arc::new(MockProvider::new());
        let a = LocationSubscriptionService::new(provider_a.clone());
        let b = Arc::new(LocationSubscriptionService::new(provider_b.clone()));

        // B's observer is slow
        let in_flight = Arc::new(AtomicUsize::new(0));
        let flight = in_flight.clone();
        b.add_observer(move |_: &Coordinate| {
            flight.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            flight.fetch_sub(1, Ordering::SeqCst);
        });

        // A's observer stops B and records whether B was still delivering
        let after_stop = Arc::new(Mutex::new(None));
        let (other, record, flight) = (b.clone(), after_stop.clone(), in_flight.clone());
        a.add_observer(move |_: &Coordinate| {
            if let Some(handle) = other.active_handle() {
                other.stop(handle);
            }
            *record.lock().unwrap() = Some(flight.load(Ordering::SeqCst));
        });

        a.start(UpdateOptions::default()).unwrap();
        b.start(UpdateOptions::default()).unwrap();

        let platform = {
            let provider_b = provider_b.clone();
            thread::spawn(move || provider_b.emit(sample_fix(0)))
        };
        while in_flight.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        provider_a.emit(sample_fix(0));
        assert_eq!(platform.join().unwrap(), 1);

        assert_eq!(*after_stop.lock().unwrap(), Some(0));
        assert!(!b.is_active());
        assert_eq!(provider_b.registration_count(), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let provider = Arc::new(MockProvider::new());
        {
            let service = LocationSubscriptionService::new(provider.clone());
            service.start(UpdateOptions::default()).unwrap();
            assert_eq!(provider.registration_count(), 1);
        }
        assert_eq!(provider.registration_count(), 0);
    }

    #[test]
    fn test_options_of_active_subscription() {
        let (_provider, service, _seen) = recording_service();
        assert!(service.options().is_none());
        let options = UpdateOptions {
            min_displacement: 25.0,
            ..UpdateOptions::default()
        };
        service.start(options.clone()).unwrap();
        assert_eq!(service.options(), Some(options));
    }
}
