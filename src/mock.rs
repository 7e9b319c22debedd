//! In-process positioning provider.
//!
//! Behaves like a platform location service: it checks permission and
//! provider existence on registration, applies each registration's
//! interval/displacement thresholds, and withholds fixes while a provider is
//! disabled. Callbacks run on the thread calling [`MockProvider::emit`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::provider::{LocationListener, PositioningProvider, RegistrationId, UpdateRequest};
use crate::throttle::FixThrottle;
use crate::{Coordinate, LocationError, ProviderState, Result, GPS_PROVIDER};

struct MockRegistration {
    request: UpdateRequest,
    listener: Arc<dyn LocationListener>,
    throttle: FixThrottle,
}

struct MockState {
    permission_granted: bool,
    providers: HashMap<String, ProviderState>,
    registrations: BTreeMap<RegistrationId, MockRegistration>,
    next_id: u64,
    total_registrations: usize,
}

/// Fake positioning provider for tests and desktop runs.
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    /// A device with an enabled "gps" provider and permission granted.
    pub fn new() -> Self {
        Self::with_providers(&[GPS_PROVIDER])
    }

    /// A device exposing exactly `providers`, all enabled.
    pub fn with_providers(providers: &[&str]) -> Self {
        Self {
            state: Mutex::new(MockState {
                permission_granted: true,
                providers: providers
                    .iter()
                    .map(|name| (name.to_string(), ProviderState::Enabled))
                    .collect(),
                registrations: BTreeMap::new(),
                next_id: 1,
                total_registrations: 0,
            }),
        }
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.lock().permission_granted = granted;
    }

    /// Toggle a provider, notifying listeners registered for it.
    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) {
        let listeners = {
            let mut state = self.lock();
            let new_state = if enabled {
                ProviderState::Enabled
            } else {
                ProviderState::Disabled
            };
            match state.providers.get_mut(provider) {
                Some(current) if *current != new_state => *current = new_state,
                _ => return,
            }
            state.listeners_for(provider)
        };

        debug!(
            "[MockProvider] '{}' {}",
            provider,
            if enabled { "enabled" } else { "disabled" }
        );
        for listener in listeners {
            if enabled {
                listener.on_provider_enabled(provider);
            } else {
                listener.on_provider_disabled(provider);
            }
        }
    }

    /// Report a fix from the "gps" provider. Returns the number of listeners
    /// it was delivered to.
    pub fn emit(&self, fix: Coordinate) -> usize {
        self.emit_from(GPS_PROVIDER, fix)
    }

    /// Report a fix from `provider`.
    pub fn emit_from(&self, provider: &str, fix: Coordinate) -> usize {
        let listeners: Vec<Arc<dyn LocationListener>> = {
            let mut state = self.lock();
            if state.providers.get(provider) != Some(&ProviderState::Enabled) {
                return 0;
            }
            state
                .registrations
                .values_mut()
                .filter(|r| r.request.provider == provider)
                .filter_map(|r| r.throttle.admit(&fix).then(|| r.listener.clone()))
                .collect()
        };

        for listener in &listeners {
            listener.on_location_changed(fix);
        }
        listeners.len()
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.lock().registrations.len()
    }

    /// Number of registrations ever accepted.
    pub fn total_registrations(&self) -> usize {
        self.lock().total_registrations
    }

    /// Requests of the live registrations, oldest first.
    pub fn active_requests(&self) -> Vec<UpdateRequest> {
        self.lock()
            .registrations
            .values()
            .map(|r| r.request.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockState {
    fn listeners_for(&self, provider: &str) -> Vec<Arc<dyn LocationListener>> {
        self.registrations
            .values()
            .filter(|r| r.request.provider == provider)
            .map(|r| r.listener.clone())
            .collect()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PositioningProvider for MockProvider {
    fn request_updates(
        &self,
        request: &UpdateRequest,
        listener: Arc<dyn LocationListener>,
    ) -> Result<RegistrationId> {
        let mut state = self.lock();
        if !state.permission_granted {
            return Err(LocationError::PermissionDenied {
                provider: request.provider.clone(),
            });
        }
        if !state.providers.contains_key(&request.provider) {
            return Err(LocationError::ProviderUnavailable {
                provider: request.provider.clone(),
            });
        }

        let id = RegistrationId(state.next_id);
        state.next_id += 1;
        state.total_registrations += 1;
        state.registrations.insert(
            id,
            MockRegistration {
                request: request.clone(),
                listener,
                throttle: FixThrottle::from_request(request),
            },
        );
        debug!("[MockProvider] Registered {:?} on '{}'", id, request.provider);
        Ok(id)
    }

    fn remove_updates(&self, registration: RegistrationId) {
        if self.lock().registrations.remove(&registration).is_some() {
            debug!("[MockProvider] Removed {:?}", registration);
        }
    }
}
