//! Seam between the subscription service and the platform positioning
//! service.
//!
//! A platform adapter (Android `LocationManager`, CoreLocation, gpsd, the
//! [`MockProvider`](crate::MockProvider)) implements [`PositioningProvider`]
//! and is injected into the service at construction. The provider calls the
//! registered [`LocationListener`] from its own notification thread.

use std::sync::Arc;
use std::time::Duration;

use crate::{Coordinate, Result, UpdateOptions};

/// Provider-side identifier of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

/// Registration parameters handed to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub provider: String,
    pub min_interval: Duration,
    /// Meters
    pub min_displacement: f64,
}

impl From<&UpdateOptions> for UpdateRequest {
    fn from(options: &UpdateOptions) -> Self {
        Self {
            provider: options.provider.clone(),
            min_interval: options.min_interval,
            min_displacement: options.min_displacement,
        }
    }
}

/// Listener the provider notifies. Mirrors the three platform callbacks.
pub trait LocationListener: Send + Sync {
    fn on_location_changed(&self, fix: Coordinate);

    fn on_provider_enabled(&self, provider: &str);

    fn on_provider_disabled(&self, provider: &str);
}

/// A platform positioning service.
pub trait PositioningProvider: Send + Sync {
    /// Register `listener` for fixes matching `request`.
    ///
    /// Must fail with [`LocationError::PermissionDenied`](crate::LocationError::PermissionDenied)
    /// when location permission is missing and with
    /// [`LocationError::ProviderUnavailable`](crate::LocationError::ProviderUnavailable)
    /// when no provider named `request.provider` exists.
    fn request_updates(
        &self,
        request: &UpdateRequest,
        listener: Arc<dyn LocationListener>,
    ) -> Result<RegistrationId>;

    /// Drop a registration. Unknown ids are ignored.
    fn remove_updates(&self, registration: RegistrationId);
}

impl<P: PositioningProvider + ?Sized> PositioningProvider for Arc<P> {
    fn request_updates(
        &self,
        request: &UpdateRequest,
        listener: Arc<dyn LocationListener>,
    ) -> Result<RegistrationId> {
        (**self).request_updates(request, listener)
    }

    fn remove_updates(&self, registration: RegistrationId) {
        (**self).remove_updates(registration)
    }
}
