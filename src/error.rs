//! Unified error handling for the location bridge.
//!
//! Start failures are returned synchronously to the caller. Delivery
//! failures are isolated per observer invocation and only ever logged.

use thiserror::Error;

/// Unified error type for location bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// Caller lacks authorization to read the device location
    #[error("Location permission denied for provider '{provider}'")]
    PermissionDenied { provider: String },
    /// No positioning source matching the request is registered
    #[error("Location provider '{provider}' is unavailable")]
    ProviderUnavailable { provider: String },
    /// A single observer invocation failed; the subscription stays alive
    #[error("Delivery to observer failed: {message}")]
    TransientDelivery { message: String },
    /// A channel request could not be decoded
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
    /// The UI-side event sink rejected an event
    #[error("Channel error: {message}")]
    Channel { message: String },
    /// The global bridge has not been initialized
    #[error("Location bridge not initialized")]
    NotInitialized,
    /// The channel was torn down and no longer starts subscriptions
    #[error("Location channel has been torn down")]
    Terminated,
}

impl LocationError {
    /// Wire error code reported to the UI layer.
    pub fn code(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied { .. } => "PERMISSION_DENIED",
            LocationError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            LocationError::TransientDelivery { .. } => "DELIVERY_FAILED",
            LocationError::InvalidRequest { .. } => "BAD_REQUEST",
            LocationError::Channel { .. } => "CHANNEL_ERROR",
            LocationError::NotInitialized => "NOT_INITIALIZED",
            LocationError::Terminated => "TERMINATED",
        }
    }

    /// Shorthand for an observer failure.
    pub fn delivery(message: impl Into<String>) -> Self {
        LocationError::TransientDelivery {
            message: message.into(),
        }
    }
}

/// Result type alias for location bridge operations.
pub type Result<T> = std::result::Result<T, LocationError>;
