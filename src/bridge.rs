//! Bridge between the UI message channel and the subscription service.
//!
//! [`LocationChannel`] answers channel requests by driving the service, and
//! registers a forwarding observer that turns every fix and provider change
//! into a push event on the [`EventSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelRequest, ChannelResponse, EventSink, MethodCall};
use crate::service::{LocationObserver, LocationSubscriptionService, ObserverId};
use crate::{Coordinate, LocationError, ProviderState, Result, UpdateOptions};

/// Channel the UI layer issues location requests on.
pub const LOCATION_CHANNEL: &str = "com.example.location";

/// Channel the host lifecycle events are pushed on.
pub const LIFECYCLE_CHANNEL: &str = "trash_track/app_lifecycle";

/// Configuration for the location channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Name of the request channel.
    /// Default: "com.example.location"
    pub channel: String,

    /// Name of the lifecycle channel carrying `onAppTerminate`.
    /// Default: "trash_track/app_lifecycle"
    pub lifecycle_channel: String,

    /// Thresholds used by `startLocationUpdates`.
    /// Default: gps, 5000ms, 10m
    pub options: UpdateOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: LOCATION_CHANNEL.to_string(),
            lifecycle_channel: LIFECYCLE_CHANNEL.to_string(),
            options: UpdateOptions::default(),
        }
    }
}

/// Pushes observer callbacks to the UI as channel events.
struct EventForwarder {
    sink: Arc<dyn EventSink>,
}

impl LocationObserver for EventForwarder {
    fn on_update(&self, fix: &Coordinate) -> Result<()> {
        debug!(
            "[LocationChannel] Lat: {}, Lon: {}",
            fix.latitude, fix.longitude
        );
        self.sink.send(ChannelEvent::location(fix))
    }

    fn on_provider_status_changed(&self, provider: &str, state: ProviderState) -> Result<()> {
        info!("[LocationChannel] Provider {}: {:?}", provider, state);
        self.sink.send(ChannelEvent::provider_status(provider, state))
    }
}

/// Request handler for the location channel.
pub struct LocationChannel {
    service: Arc<LocationSubscriptionService>,
    sink: Arc<dyn EventSink>,
    config: BridgeConfig,
    forwarder: ObserverId,
    terminated: AtomicBool,
}

impl LocationChannel {
    pub fn new(
        service: Arc<LocationSubscriptionService>,
        sink: Arc<dyn EventSink>,
        config: BridgeConfig,
    ) -> Self {
        let forwarder = service.add_observer(EventForwarder { sink: sink.clone() });
        info!("[LocationChannel] Listening on '{}'", config.channel);
        Self {
            service,
            sink,
            config,
            forwarder,
            terminated: AtomicBool::new(false),
        }
    }

    /// Answer one method call. Unknown methods get `notImplemented`.
    pub fn handle(&self, call: &MethodCall) -> ChannelResponse {
        match ChannelRequest::parse(call) {
            Some(request) => self.dispatch(request),
            None => {
                debug!("[LocationChannel] Method '{}' not implemented", call.method);
                ChannelResponse::NotImplemented
            }
        }
    }

    pub fn dispatch(&self, request: ChannelRequest) -> ChannelResponse {
        match request {
            ChannelRequest::StartLocationUpdates => match self.start() {
                Ok(()) => ChannelResponse::success(),
                Err(e) => {
                    warn!("[LocationChannel] {} failed: {}", request.method(), e);
                    ChannelResponse::from(&e)
                }
            },
            ChannelRequest::StopLocationUpdates => {
                if let Some(handle) = self.service.active_handle() {
                    self.service.stop(handle);
                }
                ChannelResponse::success()
            }
        }
    }

    /// Answer a call in JSON wire form. Malformed input gets a
    /// `BAD_REQUEST` error response.
    pub fn handle_json(&self, json: &str) -> String {
        let response = match MethodCall::from_json(json) {
            Ok(call) => self.handle(&call),
            Err(e) => {
                warn!("[LocationChannel] Rejected request: {}", e);
                ChannelResponse::from(&e)
            }
        };
        response.to_json()
    }

    /// Refused once torn down. A start racing `teardown` is undone here or
    /// by the teardown's own shutdown, whichever runs last.
    fn start(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(LocationError::Terminated);
        }
        let handle = self.service.start(self.config.options.clone())?;
        if self.terminated.load(Ordering::SeqCst) {
            self.service.stop(handle);
            return Err(LocationError::Terminated);
        }
        Ok(())
    }

    /// Host is going away: stop updates and tell the UI. Only the first call
    /// notifies. Later `startLocationUpdates` requests are refused with
    /// `TERMINATED`. Sink failures are logged.
    pub fn teardown(&self) {
        let already = self.terminated.swap(true, Ordering::SeqCst);
        self.service.shutdown();
        if already {
            return;
        }
        match self.sink.send(ChannelEvent::AppTerminate) {
            Ok(()) => info!(
                "[LocationChannel] Sent onAppTerminate on '{}'",
                self.config.lifecycle_channel
            ),
            Err(e) => warn!(
                "[LocationChannel] Failed to clean up background location services: {}",
                e
            ),
        }
    }

    pub fn service(&self) -> &Arc<LocationSubscriptionService> {
        &self.service
    }
}

impl Drop for LocationChannel {
    fn drop(&mut self) {
        self.service.remove_observer(self.forwarder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;
    use std::sync::mpsc;

    fn setup() -> (
        Arc<MockProvider>,
        LocationChannel,
        mpsc::Receiver<ChannelEvent>,
    ) {
        let provider = Arc::new(MockProvider::new());
        let service = Arc::new(LocationSubscriptionService::new(provider.clone()));
        let (tx, rx) = mpsc::channel();
        let channel = LocationChannel::new(service, Arc::new(tx), BridgeConfig::default());
        (provider, channel, rx)
    }

    #[test]
    fn test_start_request() {
        let (provider, channel, rx) = setup();
        let response = channel.handle(&MethodCall::new("startLocationUpdates"));
        assert_eq!(response, ChannelResponse::success());

        let requests = provider.active_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].min_interval.as_millis(), 5000);
        assert_eq!(requests[0].min_displacement, 10.0);

        provider.emit(Coordinate::new(51.5074, -0.1278));
        match rx.try_recv().unwrap() {
            ChannelEvent::LocationUpdate(payload) => {
                assert_eq!(payload.latitude, 51.5074);
                assert_eq!(payload.longitude, -0.1278);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method() {
        let (_provider, channel, _rx) = setup();
        assert_eq!(
            channel.handle(&MethodCall::new("getLastKnownLocation")),
            ChannelResponse::NotImplemented
        );
    }

    #[test]
    fn test_start_denied_reports_error() {
        let (provider, channel, rx) = setup();
        provider.set_permission_granted(false);

        match channel.handle(&MethodCall::new("startLocationUpdates")) {
            ChannelResponse::Error { code, .. } => assert_eq!(code, "PERMISSION_DENIED"),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(!channel.service().is_active());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_request() {
        let (provider, channel, _rx) = setup();
        assert!(channel.handle(&MethodCall::new("stopLocationUpdates")).is_success());
        channel.handle(&MethodCall::new("startLocationUpdates"));
        assert!(channel.handle(&MethodCall::new("stopLocationUpdates")).is_success());
        assert_eq!(provider.registration_count(), 0);
    }

    #[test]
    fn test_handle_json() {
        let (_provider, channel, _rx) = setup();
        let reply = channel.handle_json(r#"{"method":"startLocationUpdates","arguments":null}"#);
        assert!(reply.contains("\"success\""));
        let reply = channel.handle_json("garbage");
        assert!(reply.contains("BAD_REQUEST"));
    }

    #[test]
    fn test_teardown_stops_and_notifies_once() {
        let (provider, channel, rx) = setup();
        channel.handle(&MethodCall::new("startLocationUpdates"));
        channel.teardown();
        channel.teardown();

        assert_eq!(provider.registration_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::AppTerminate);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_after_teardown_refused() {
        let (provider, channel, rx) = setup();
        channel.handle(&MethodCall::new("startLocationUpdates"));
        channel.teardown();
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::AppTerminate);

        match channel.handle(&MethodCall::new("startLocationUpdates")) {
            ChannelResponse::Error { code, .. } => assert_eq!(code, "TERMINATED"),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(!channel.service().is_active());
        assert_eq!(provider.registration_count(), 0);
        assert_eq!(provider.total_registrations(), 1);

        // Nothing reaches the UI after onAppTerminate
        provider.emit(Coordinate::new(51.5074, -0.1278));
        assert!(rx.try_recv().is_err());
        assert!(channel.handle(&MethodCall::new("stopLocationUpdates")).is_success());
    }

    #[test]
    fn test_teardown_with_closed_sink() {
        let (provider, channel, rx) = setup();
        channel.handle(&MethodCall::new("startLocationUpdates"));
        drop(rx);
        // Sink failure is logged, not propagated
        channel.teardown();
        assert_eq!(provider.registration_count(), 0);
    }

    #[test]
    fn test_drop_removes_forwarder() {
        let (_provider, channel, _rx) = setup();
        let service = channel.service().clone();
        assert_eq!(service.observer_count(), 1);
        drop(channel);
        assert_eq!(service.observer_count(), 0);
    }
}
