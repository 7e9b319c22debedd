//! Tokio channel adapter for service events.
//!
//! Lets async consumers `recv().await` fixes instead of implementing
//! [`LocationObserver`]. The service still creates no tasks or threads;
//! events are pushed from the provider's callback thread.

use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::service::{LocationObserver, LocationSubscriptionService, ObserverId};
use crate::{Coordinate, LocationError, ProviderState, Result};

/// One delivery from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Update(Coordinate),
    ProviderStatus {
        provider: String,
        state: ProviderState,
    },
}

struct ChannelObserver {
    tx: UnboundedSender<ServiceEvent>,
}

impl ChannelObserver {
    fn forward(&self, event: ServiceEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| LocationError::delivery("event stream receiver dropped"))
    }
}

impl LocationObserver for ChannelObserver {
    fn on_update(&self, fix: &Coordinate) -> Result<()> {
        self.forward(ServiceEvent::Update(*fix))
    }

    fn on_provider_status_changed(&self, provider: &str, state: ProviderState) -> Result<()> {
        self.forward(ServiceEvent::ProviderStatus {
            provider: provider.to_string(),
            state,
        })
    }
}

/// Register a channel-backed observer.
///
/// Remove it with [`LocationSubscriptionService::remove_observer`] once the
/// receiver is no longer read; until then deliveries to a dropped receiver
/// are logged as transient failures.
pub fn subscribe_events(
    service: &LocationSubscriptionService,
) -> (ObserverId, UnboundedReceiver<ServiceEvent>) {
    let (tx, rx) = unbounded_channel();
    let id = service.add_shared_observer(Arc::new(ChannelObserver { tx }));
    (id, rx)
}
