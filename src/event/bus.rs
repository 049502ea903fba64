use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::shared::AppError;

/// First wait before re-establishing a lost subscription
pub const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_millis(100);
/// Ceiling for the doubling wait between resubscribe attempts
pub const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Doubles `current`, capped at [`RESUBSCRIBE_BACKOFF_MAX`]
pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(RESUBSCRIBE_BACKOFF_MAX)
}

/// A message as carried by the bus: topic plus serialized event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// Topic-based pub/sub shared by every engine and hub instance
///
/// Delivery is at-most-once. Subscribers get a broadcast receiver and must
/// tolerate `Lagged` by resynchronizing from a snapshot.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), AppError>;

    /// Subscribes to every topic matching `pattern` (see [`topic_matches`])
    async fn subscribe(&self, pattern: &str) -> Result<broadcast::Receiver<BusMessage>, AppError>;
}

/// Subject-style matching over dot-separated tokens
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut topic_tokens = topic.split('.');

    loop {
        match (pattern_tokens.next(), topic_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// In-process bus for single-node deployments and tests
#[derive(Debug)]
pub struct InMemoryEventBus {
    /// Subscription pattern -> sender
    channels: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), AppError> {
        let channels = self.channels.read().await;

        let mut delivered = 0;
        for (pattern, sender) in channels.iter() {
            if topic_matches(pattern, topic) {
                let message = BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if let Ok(receivers) = sender.send(message) {
                    delivered += receivers;
                }
            }
        }

        debug!(topic = %topic, receivers = delivered, "Bus message published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<broadcast::Receiver<BusMessage>, AppError> {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(pattern.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }
}

/// Redis pub/sub bus for multi-node deployments
#[derive(Clone)]
pub struct RedisEventBus {
    client: Client,
    publish_conn: ConnectionManager,
    capacity: usize,
}

impl RedisEventBus {
    pub async fn connect(url: &str, capacity: usize) -> Result<Self, AppError> {
        info!("Connecting event bus to Redis");

        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;
        let publish_conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| AppError::Transient(format!("Redis connection failed: {}", e)))?;

        Ok(Self {
            client,
            publish_conn,
            capacity,
        })
    }
}

/// Redis glob equivalent of a subject pattern; results are re-filtered with [`topic_matches`]
fn redis_pattern(pattern: &str) -> String {
    pattern
        .split('.')
        .map(|token| if token == ">" { "*" } else { token })
        .collect::<Vec<_>>()
        .join(".")
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), AppError> {
        let mut conn = self.publish_conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Publish(format!("Redis PUBLISH failed: {}", e)))?;

        debug!(topic = %topic, receivers = receivers, "Bus message published to Redis");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<broadcast::Receiver<BusMessage>, AppError> {
        let pubsub = open_pubsub(&self.client, pattern).await?;
        let (sender, receiver) = broadcast::channel(self.capacity);

        tokio::spawn(pump(self.client.clone(), pattern.to_string(), pubsub, sender));
        Ok(receiver)
    }
}

async fn open_pubsub(client: &Client, pattern: &str) -> Result<PubSub, AppError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| AppError::Transient(format!("Redis pub/sub connection failed: {}", e)))?;
    pubsub
        .psubscribe(redis_pattern(pattern))
        .await
        .map_err(|e| AppError::Transient(format!("Redis PSUBSCRIBE failed: {}", e)))?;
    Ok(pubsub)
}

/// Feeds Redis messages into `sender`, reconnecting whenever the connection drops
///
/// Ends once every receiver is gone. Messages published while disconnected
/// are lost, so the restore is logged for observers to resync.
async fn pump(
    client: Client,
    pattern: String,
    mut pubsub: PubSub,
    sender: broadcast::Sender<BusMessage>,
) {
    info!(pattern = %pattern, "Redis subscription task started");

    loop {
        let mut messages = Box::pin(pubsub.into_on_message());

        while let Some(msg) = messages.next().await {
            let topic = msg.get_channel_name().to_string();
            if !topic_matches(&pattern, &topic) {
                continue;
            }
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Dropping unreadable bus payload");
                    continue;
                }
            };
            if sender.send(BusMessage { topic, payload }).is_err() {
                info!(pattern = %pattern, "No subscribers left, ending Redis subscription");
                return;
            }
        }

        warn!(pattern = %pattern, "Redis subscription lost, reconnecting");
        let lost_at = Instant::now();
        let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
        let mut attempt: u32 = 1;

        pubsub = loop {
            tokio::time::sleep(backoff).await;
            if sender.receiver_count() == 0 {
                info!(pattern = %pattern, "No subscribers left, ending Redis subscription");
                return;
            }
            match open_pubsub(&client, &pattern).await {
                Ok(pubsub) => {
                    warn!(
                        pattern = %pattern,
                        attempts = attempt,
                        lost_for_ms = lost_at.elapsed().as_millis() as u64,
                        "Redis subscription restored, events published meanwhile were missed"
                    );
                    break pubsub;
                }
                Err(e) => {
                    debug!(pattern = %pattern, attempt = attempt, error = %e, "Redis resubscribe failed");
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
            }
        };
    }
}
