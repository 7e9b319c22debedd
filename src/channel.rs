//! Message-channel protocol between the UI layer and the location service.
//!
//! Requests arrive as `{"method": "...", "arguments": ...}` and are parsed
//! into the typed [`ChannelRequest`] union at the boundary. Every request is
//! answered with one [`ChannelResponse`]; fixes and provider changes are
//! pushed as [`ChannelEvent`]s through an [`EventSink`].

use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Coordinate, LocationError, ProviderState, Result};

pub const START_LOCATION_UPDATES: &str = "startLocationUpdates";
pub const STOP_LOCATION_UPDATES: &str = "stopLocationUpdates";

// ============================================================================
// Requests
// ============================================================================

/// A method call as it arrives on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Value::Null,
        }
    }

    /// Decode a call from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LocationError::InvalidRequest {
            message: e.to_string(),
        })
    }
}

/// Requests the location channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Start default-threshold updates. Takes no arguments.
    StartLocationUpdates,
    /// Stop the active subscription, if any.
    StopLocationUpdates,
}

impl ChannelRequest {
    /// `None` for methods this channel does not implement.
    pub fn parse(call: &MethodCall) -> Option<Self> {
        match call.method.as_str() {
            START_LOCATION_UPDATES => Some(ChannelRequest::StartLocationUpdates),
            STOP_LOCATION_UPDATES => Some(ChannelRequest::StopLocationUpdates),
            _ => None,
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            ChannelRequest::StartLocationUpdates => START_LOCATION_UPDATES,
            ChannelRequest::StopLocationUpdates => STOP_LOCATION_UPDATES,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Reply to one method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChannelResponse {
    Success { result: Value },
    Error { code: String, message: String },
    NotImplemented,
}

impl ChannelResponse {
    /// Acknowledgment without payload.
    pub fn success() -> Self {
        ChannelResponse::Success {
            result: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChannelResponse::Success { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&LocationError> for ChannelResponse {
    fn from(err: &LocationError) -> Self {
        ChannelResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&Coordinate> for LocationPayload {
    fn from(fix: &Coordinate) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatusPayload {
    pub provider: String,
    pub enabled: bool,
}

/// Events pushed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ChannelEvent {
    #[serde(rename = "locationUpdate")]
    LocationUpdate(LocationPayload),
    #[serde(rename = "providerStatus")]
    ProviderStatus(ProviderStatusPayload),
    /// Host is being torn down
    #[serde(rename = "onAppTerminate")]
    AppTerminate,
}

impl ChannelEvent {
    pub fn location(fix: &Coordinate) -> Self {
        ChannelEvent::LocationUpdate(LocationPayload::from(fix))
    }

    pub fn provider_status(provider: &str, state: ProviderState) -> Self {
        ChannelEvent::ProviderStatus(ProviderStatusPayload {
            provider: provider.to_string(),
            enabled: state.is_enabled(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Transport carrying events to the UI layer.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ChannelEvent) -> Result<()>;
}

impl EventSink for mpsc::Sender<ChannelEvent> {
    fn send(&self, event: ChannelEvent) -> Result<()> {
        mpsc::Sender::send(self, event).map_err(|_| LocationError::Channel {
            message: "event receiver dropped".to_string(),
        })
    }
}

impl EventSink for mpsc::SyncSender<ChannelEvent> {
    fn send(&self, event: ChannelEvent) -> Result<()> {
        mpsc::SyncSender::try_send(self, event).map_err(|e| LocationError::Channel {
            message: e.to_string(),
        })
    }
}
