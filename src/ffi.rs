//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host implements [`ForeignLocationProvider`] on top of its platform
//! location service and [`ForeignEventSink`] on top of its UI message
//! channel, then calls [`location_bridge_init`]. Fixes and provider changes
//! are reported back with the `location_bridge_on_*` functions, keyed by the
//! registration id Rust handed to `request_updates`.
//!
//! The bridge lives in a global singleton so the host does not need to carry
//! Rust objects across the FFI boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::bridge::{BridgeConfig, LocationChannel};
use crate::channel::{ChannelEvent, ChannelResponse, EventSink, MethodCall};
use crate::provider::{LocationListener, PositioningProvider, RegistrationId, UpdateRequest};
use crate::service::LocationSubscriptionService;
use crate::{init_logging, Coordinate, LocationError, Result, UpdateOptions};

// ============================================================================
// Callback Interfaces (implemented in Kotlin/Swift)
// ============================================================================

/// Result of asking the platform to register for updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum RegistrationOutcome {
    Registered,
    PermissionDenied,
    ProviderUnavailable,
}

/// Platform location service, e.g. Android `LocationManager`.
#[uniffi::export(callback_interface)]
pub trait ForeignLocationProvider: Send + Sync {
    /// Register for updates. Report fixes with
    /// `location_bridge_on_location_changed(registration, ...)`.
    fn request_updates(
        &self,
        registration: u64,
        provider: String,
        min_time_ms: u64,
        min_distance_m: f64,
    ) -> RegistrationOutcome;

    fn remove_updates(&self, registration: u64);
}

/// UI-side receiver of push events (JSON encoded).
#[uniffi::export(callback_interface)]
pub trait ForeignEventSink: Send + Sync {
    fn on_event(&self, event_json: String);
}

// ============================================================================
// Adapters
// ============================================================================

/// Routes foreign registrations to the listeners the service created.
struct ForeignProviderAdapter {
    foreign: Box<dyn ForeignLocationProvider>,
    listeners: Mutex<HashMap<u64, Arc<dyn LocationListener>>>,
    next_registration: AtomicU64,
}

impl ForeignProviderAdapter {
    fn new(foreign: Box<dyn ForeignLocationProvider>) -> Self {
        Self {
            foreign,
            listeners: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
        }
    }

    fn listener(&self, registration: u64) -> Option<Arc<dyn LocationListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&registration)
            .cloned()
    }
}

impl PositioningProvider for ForeignProviderAdapter {
    fn request_updates(
        &self,
        request: &UpdateRequest,
        listener: Arc<dyn LocationListener>,
    ) -> Result<RegistrationId> {
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);

        // Visible before the host can report the first fix
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(registration, listener);

        let min_time_ms = u64::try_from(request.min_interval.as_millis()).unwrap_or(u64::MAX);
        let outcome = self.foreign.request_updates(
            registration,
            request.provider.clone(),
            min_time_ms,
            request.min_displacement,
        );

        let error = match outcome {
            RegistrationOutcome::Registered => return Ok(RegistrationId(registration)),
            RegistrationOutcome::PermissionDenied => LocationError::PermissionDenied {
                provider: request.provider.clone(),
            },
            RegistrationOutcome::ProviderUnavailable => LocationError::ProviderUnavailable {
                provider: request.provider.clone(),
            },
        };
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&registration);
        Err(error)
    }

    fn remove_updates(&self, registration: RegistrationId) {
        let removed = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&registration.0);
        if removed.is_some() {
            self.foreign.remove_updates(registration.0);
        }
    }
}

struct ForeignSink(Box<dyn ForeignEventSink>);

impl EventSink for ForeignSink {
    fn send(&self, event: ChannelEvent) -> Result<()> {
        self.0.on_event(event.to_json());
        Ok(())
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

struct FfiBridge {
    provider: Arc<ForeignProviderAdapter>,
    channel: LocationChannel,
}

static BRIDGE: Lazy<Mutex<Option<Arc<FfiBridge>>>> = Lazy::new(|| Mutex::new(None));

/// Snapshot of the installed bridge. The global lock is never held while
/// calling into the service, so host callbacks may re-enter.
fn current_bridge() -> Option<Arc<FfiBridge>> {
    BRIDGE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn install(bridge: Option<Arc<FfiBridge>>) -> Option<Arc<FfiBridge>> {
    let mut guard = BRIDGE.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, bridge)
}

// ============================================================================
// FFI Exports
// ============================================================================

/// Install the bridge with default options (gps, 5000ms, 10m).
#[uniffi::export]
pub fn location_bridge_init(
    provider: Box<dyn ForeignLocationProvider>,
    sink: Box<dyn ForeignEventSink>,
) {
    location_bridge_init_with_options(provider, sink, UpdateOptions::default());
}

/// Install the bridge. A previously installed bridge is shut down.
#[uniffi::export]
pub fn location_bridge_init_with_options(
    provider: Box<dyn ForeignLocationProvider>,
    sink: Box<dyn ForeignEventSink>,
    options: UpdateOptions,
) {
    init_logging();

    let adapter = Arc::new(ForeignProviderAdapter::new(provider));
    let service = Arc::new(LocationSubscriptionService::new(adapter.clone()));
    let config = BridgeConfig {
        options,
        ..BridgeConfig::default()
    };
    let channel = LocationChannel::new(service, Arc::new(ForeignSink(sink)), config);

    if let Some(previous) = install(Some(Arc::new(FfiBridge {
        provider: adapter,
        channel,
    }))) {
        info!("[LocationBridge] Replacing existing bridge");
        previous.channel.service().shutdown();
    }
    info!("[LocationBridge] Initialized");
}

/// Answer a channel method call. Returns the JSON response.
///
/// `arguments_json` may be empty for calls without arguments.
#[uniffi::export]
pub fn location_bridge_handle_call(method: String, arguments_json: String) -> String {
    let Some(bridge) = current_bridge() else {
        return ChannelResponse::from(&LocationError::NotInitialized).to_json();
    };

    let arguments = if arguments_json.trim().is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_str(&arguments_json) {
            Ok(value) => value,
            Err(e) => {
                let err = LocationError::InvalidRequest {
                    message: e.to_string(),
                };
                return ChannelResponse::from(&err).to_json();
            }
        }
    };

    bridge
        .channel
        .handle(&MethodCall { method, arguments })
        .to_json()
}

/// Report a fix for `registration`.
#[uniffi::export]
pub fn location_bridge_on_location_changed(registration: u64, fix: Coordinate) {
    if !fix.is_valid() {
        warn!("[LocationBridge] Dropping invalid fix {:?}", fix);
        return;
    }
    match current_bridge().and_then(|b| b.provider.listener(registration)) {
        Some(listener) => listener.on_location_changed(fix),
        None => debug!("[LocationBridge] Fix for unknown registration {}", registration),
    }
}

#[uniffi::export]
pub fn location_bridge_on_provider_enabled(registration: u64, provider: String) {
    if let Some(listener) = current_bridge().and_then(|b| b.provider.listener(registration)) {
        listener.on_provider_enabled(&provider);
    }
}

#[uniffi::export]
pub fn location_bridge_on_provider_disabled(registration: u64, provider: String) {
    if let Some(listener) = current_bridge().and_then(|b| b.provider.listener(registration)) {
        listener.on_provider_disabled(&provider);
    }
}

/// Host view is being destroyed: stop updates, push `onAppTerminate`, and
/// uninstall the bridge.
#[uniffi::export]
pub fn location_bridge_teardown() {
    match install(None) {
        Some(bridge) => {
            bridge.channel.teardown();
            info!("[LocationBridge] Torn down");
        }
        None => debug!("[LocationBridge] Teardown without bridge"),
    }
}

/// Get default subscription options.
#[uniffi::export]
pub fn default_update_options() -> UpdateOptions {
    UpdateOptions::default()
}

// ============================================================================
// Tests
// ============================================================================
