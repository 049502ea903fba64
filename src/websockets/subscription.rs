use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::hub::ConnectionHub;
use super::messages::OutboundMessage;
use crate::event::{
    next_backoff, BusMessage, EventBus, SeatEvent, ALL_SEAT_EVENTS, RESUBSCRIBE_BACKOFF_MIN,
};
use crate::shared::AppError;

/// Forwards every seat event on the bus to the local hub
pub struct HubSubscription {
    event_bus: Arc<dyn EventBus>,
    hub: ConnectionHub,
}

impl HubSubscription {
    pub fn new(event_bus: Arc<dyn EventBus>, hub: ConnectionHub) -> Self {
        Self { event_bus, hub }
    }

    /// Subscribes to the wildcard seat topic and spawns the forwarding task
    ///
    /// The subscription is in place when this returns, so nothing published
    /// afterwards is missed. A closed subscription is re-established with
    /// backoff; the task only ends when the hub stops.
    pub async fn start(self) -> Result<JoinHandle<()>, AppError> {
        info!(pattern = ALL_SEAT_EVENTS, "Starting hub subscription");

        let receiver = self.event_bus.subscribe(ALL_SEAT_EVENTS).await?;
        Ok(tokio::spawn(self.run(receiver)))
    }

    async fn run(self, mut receiver: broadcast::Receiver<BusMessage>) {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if let Err(e) = forward(&self.hub, message).await {
                        warn!(error = %e, "Hub stopped, ending subscription");
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Observers resynchronise from their next snapshot
                    warn!(skipped = skipped, "Hub subscription lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    warn!("Hub subscription closed by the bus, resubscribing");
                    receiver = self.resubscribe().await;
                }
            }
        }
    }

    async fn resubscribe(&self) -> broadcast::Receiver<BusMessage> {
        let lost_at = Instant::now();
        let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
        let mut attempt: u32 = 1;

        loop {
            tokio::time::sleep(backoff).await;
            match self.event_bus.subscribe(ALL_SEAT_EVENTS).await {
                Ok(receiver) => {
                    warn!(
                        attempts = attempt,
                        lost_for_ms = lost_at.elapsed().as_millis() as u64,
                        "Hub subscription restored, sessions may have missed events"
                    );
                    return receiver;
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Resubscribe failed");
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
            }
        }
    }
}

async fn forward(hub: &ConnectionHub, message: BusMessage) -> Result<(), AppError> {
    let event: SeatEvent = match serde_json::from_str(&message.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "Dropping undecodable seat event");
            return Ok(());
        }
    };

    let outbound = match OutboundMessage::resource_update(event).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "Failed to encode resource update");
            return Ok(());
        }
    };

    let report = hub.broadcast(outbound).await?;
    debug!(
        topic = %message.topic,
        delivered = report.delivered,
        evicted = report.evicted,
        "Seat event forwarded to sessions"
    );
    Ok(())
}
