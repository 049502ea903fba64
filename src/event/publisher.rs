use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::bus::EventBus;
use super::events::SeatEvent;
use crate::shared::AppError;

/// How hard to try before a notification is dropped
#[derive(Debug, Clone, Copy)]
pub struct PublishPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl PublishPolicy {
    /// Retries without sleeping between attempts
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

/// Translates seat events into bus messages
///
/// Stateless apart from its bus handle. Publishing never feeds back into seat
/// state: by the time an event exists the transition is already committed.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    policy: PublishPolicy,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, policy: PublishPolicy) -> Self {
        Self { bus, policy }
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }

    /// Single publish attempt on the event's kind topic
    pub async fn publish(&self, event: &SeatEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Publish(format!("Failed to encode event: {}", e)))?;
        self.bus.publish(&event.topic(), payload).await
    }

    /// Publishes with bounded retries; returns whether the event went out
    ///
    /// Failures are logged and swallowed.
    pub async fn publish_with_retry(&self, event: &SeatEvent) -> bool {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.publish(event).await {
                Ok(()) => {
                    info!(
                        event_type = %event.kind,
                        seat_id = %event.seat_id,
                        user_id = %event.user_id,
                        "Published seat event"
                    );
                    return true;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        event_type = %event.kind,
                        seat_id = %event.seat_id,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Failed to publish seat event, retrying"
                    );
                    if !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
                Err(e) => {
                    error!(
                        event_type = %event.kind,
                        seat_id = %event.seat_id,
                        attempts = attempts,
                        error = %e,
                        "Seat event dropped; state is committed but observers were not notified"
                    );
                }
            }
        }

        false
    }
}
