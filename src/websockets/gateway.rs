use async_trait::async_trait;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::hub::ConnectionHub;
use super::messages::{Intent, IntentKind, OutboundMessage, ProtocolError, SeatAction};
use super::socket::MessageHandler;
use crate::seat::models::SeatModel;
use crate::seat::ReservationService;
use crate::shared::AppError;

/// Bounds on calls from a session into the reservation service
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub engine_call_timeout: Duration,
    /// Attempts for transient failures, including the first
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine_call_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unidentified,
    Identified { actor_id: String },
    Closed,
}

/// Per-connection protocol adapter
///
/// Turns intents into reservation calls and answers each one with an ack on
/// the originating session only. Observers converge through the hub.
pub struct SessionGateway {
    session_id: String,
    state: SessionState,
    reservation_service: Arc<ReservationService>,
    hub: ConnectionHub,
    config: GatewayConfig,
}

impl SessionGateway {
    pub fn new(
        session_id: String,
        reservation_service: Arc<ReservationService>,
        hub: ConnectionHub,
        config: GatewayConfig,
    ) -> Self {
        Self {
            session_id,
            state: SessionState::Unidentified,
            reservation_service,
            hub,
            config,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = %self.session_id, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Handles one inbound frame and returns the replies for this session
    #[instrument(skip(self, text), fields(session_id = %self.session_id))]
    pub async fn handle_text(&mut self, text: &str) -> Vec<OutboundMessage> {
        if self.state == SessionState::Closed {
            debug!("Ignoring intent on closed session");
            return Vec::new();
        }

        let intent = match Intent::parse(text) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "Rejected client message");
                return vec![OutboundMessage::protocol_error(&e)];
            }
        };

        let kind = intent.kind();
        if let Err(message) = self.bind_actor(intent.actor_id()).await {
            return vec![OutboundMessage::ack_failed(kind, message)];
        }

        match intent {
            Intent::Subscribe { .. } => self.subscribe().await,
            Intent::Seat {
                action,
                resource_id,
                ..
            } => {
                let actor_id = match &self.state {
                    SessionState::Identified { actor_id } => actor_id.clone(),
                    _ => {
                        let e = ProtocolError::MissingField("actor_id");
                        return vec![OutboundMessage::protocol_error(&e)];
                    }
                };
                vec![self.seat_action(action, &resource_id, &actor_id).await]
            }
        }
    }

    /// First actor seen binds the session; a different actor afterwards is refused
    async fn bind_actor(&mut self, actor_id: Option<&str>) -> Result<(), String> {
        let Some(actor_id) = actor_id else {
            return Ok(());
        };

        match &self.state {
            SessionState::Identified { actor_id: bound } if bound == actor_id => Ok(()),
            SessionState::Identified { actor_id: bound } => {
                warn!(bound = %bound, requested = %actor_id, "Actor switch refused");
                Err(format!("session is bound to actor {}", bound))
            }
            _ => {
                self.state = SessionState::Identified {
                    actor_id: actor_id.to_string(),
                };
                info!(actor_id = %actor_id, "Session identified");
                if let Err(e) = self.hub.identify(&self.session_id, actor_id).await {
                    debug!(error = %e, "Hub did not record actor");
                }
                Ok(())
            }
        }
    }

    /// Ack followed by the full seat map; the hub keeps no history to replay
    async fn subscribe(&self) -> Vec<OutboundMessage> {
        let actor_id = match &self.state {
            SessionState::Identified { actor_id } => Some(actor_id.clone()),
            _ => None,
        };

        let service = Arc::clone(&self.reservation_service);
        let snapshot = self
            .call_engine(move || {
                let service = Arc::clone(&service);
                async move { service.get_snapshot().await }
            })
            .await;
        match snapshot {
            Ok(seats) => vec![
                OutboundMessage::ack_ok(
                    IntentKind::Subscribe,
                    "Subscribed",
                    Some(json!({
                        "session_id": self.session_id,
                        "actor_id": actor_id,
                    })),
                ),
                OutboundMessage::inventory(seats),
            ],
            Err(e) => {
                warn!(error = %e, "Snapshot for subscribe failed");
                vec![OutboundMessage::ack_failed(
                    IntentKind::Subscribe,
                    e.to_string(),
                )]
            }
        }
    }

    async fn seat_action(
        &self,
        action: SeatAction,
        resource_id: &str,
        actor_id: &str,
    ) -> OutboundMessage {
        let (kind, done) = match action {
            SeatAction::Acquire => (IntentKind::Acquire, "Seat held"),
            SeatAction::Confirm => (IntentKind::Confirm, "Seat booked"),
            SeatAction::Release => (IntentKind::Release, "Seat released"),
        };

        let service = Arc::clone(&self.reservation_service);
        let (seat_id, user_id) = (resource_id.to_string(), actor_id.to_string());
        let result = self
            .call_engine(move || {
                let service = Arc::clone(&service);
                let (seat_id, user_id) = (seat_id.clone(), user_id.clone());
                async move {
                    match action {
                        SeatAction::Acquire => service.select_seat(&seat_id, &user_id).await,
                        SeatAction::Confirm => service.confirm_book(&seat_id, &user_id).await,
                        SeatAction::Release => service.release_hold(&seat_id, &user_id).await,
                    }
                }
            })
            .await;

        match result {
            Ok(seat) => OutboundMessage::ack_ok(kind, done, seat_data(&seat)),
            Err(e) => {
                debug!(
                    resource_id = %resource_id,
                    actor_id = %actor_id,
                    error = %e,
                    "Seat intent refused"
                );
                OutboundMessage::ack_failed(kind, e.to_string())
            }
        }
    }

    /// Bounded wait per attempt; only transient failures are retried
    ///
    /// Each call runs as its own task, so a timeout never cancels a mutation
    /// halfway through its lock, record and publish steps. A timed-out call
    /// is waited on again rather than issued a second time.
    async fn call_engine<T, F, Fut>(&self, call: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        let mut in_flight = tokio::spawn(call());

        loop {
            let result = match tokio::time::timeout(self.config.engine_call_timeout, &mut in_flight)
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(AppError::Internal(format!(
                    "reservation call aborted: {}",
                    e
                ))),
                Err(_) if attempt < attempts => {
                    warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        "Reservation call still running, waiting again"
                    );
                    attempt += 1;
                    continue;
                }
                Err(_) => {
                    // Dropping the handle detaches the task; it still runs to completion
                    return Err(AppError::Transient(
                        "reservation service timed out, the request may still complete"
                            .to_string(),
                    ));
                }
            };

            match result {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_backoff).await;
                    in_flight = tokio::spawn(call());
                }
                other => return other,
            }
        }
    }
}

fn seat_data(seat: &SeatModel) -> Option<serde_json::Value> {
    serde_json::to_value(seat).ok()
}

#[async_trait]
impl MessageHandler for SessionGateway {
    async fn handle_message(&mut self, message: String) -> Vec<String> {
        let mut replies = Vec::new();
        for reply in self.handle_text(&message).await {
            match reply.to_json() {
                Ok(json) => replies.push(json),
                Err(e) => warn!(session_id = %self.session_id, error = %e, "Failed to encode reply"),
            }
        }
        replies
    }

    fn on_close(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::{EventBus, EventPublisher, InMemoryEventBus, PublishPolicy, SeatEventKind};
    use crate::seat::models::{venue_layout, SeatStatus};
    use crate::seat::repository::test_support::FaultyRepository;
    use crate::seat::repository::InMemorySeatRepository;
    use crate::websockets::HubConfig;
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: Arc<InMemorySeatRepository>,
        repo: Arc<FaultyRepository>,
        bus: Arc<InMemoryEventBus>,
        service: Arc<ReservationService>,
        hub: ConnectionHub,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let inner = Arc::new(InMemorySeatRepository::with_seats(
            Arc::new(clock.clone()),
            venue_layout(3, 3),
        ));
        let repo = Arc::new(FaultyRepository::new(inner.clone()));
        let bus = Arc::new(InMemoryEventBus::new(16));
        let service = Arc::new(ReservationService::new(
            repo.clone(),
            EventPublisher::new(bus.clone(), PublishPolicy::immediate()),
            Arc::new(clock),
            Duration::from_secs(30),
        ));
        Fixture {
            store: inner,
            repo,
            bus,
            service,
            hub: ConnectionHub::spawn(HubConfig::default()),
        }
    }

    fn gateway(f: &Fixture, session_id: &str) -> SessionGateway {
        gateway_with(
            f,
            session_id,
            GatewayConfig {
                engine_call_timeout: Duration::from_secs(1),
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    fn gateway_with(f: &Fixture, session_id: &str, config: GatewayConfig) -> SessionGateway {
        SessionGateway::new(session_id.to_string(), f.service.clone(), f.hub.clone(), config)
    }

    async fn seat_status(f: &Fixture, seat_id: &str) -> SeatStatus {
        f.service
            .get_snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.id == seat_id)
            .unwrap()
            .status
    }

    fn ack_success(message: &OutboundMessage) -> bool {
        match message {
            OutboundMessage::Ack { success, .. } => *success,
            other => panic!("expected ack, got {:?}", other),
        }
    }

    fn ack_text(message: &OutboundMessage) -> String {
        match message {
            OutboundMessage::Ack { message, .. } => message.clone(),
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_binds_actor_and_sends_inventory() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");

        let replies = gw
            .handle_text(r#"{"intent":"subscribe","actor_id":"u1"}"#)
            .await;

        assert_eq!(replies.len(), 2);
        match &replies[0] {
            OutboundMessage::Ack {
                intent,
                success,
                data,
                ..
            } => {
                assert_eq!(intent, "subscribe");
                assert!(*success);
                let data = data.as_ref().unwrap();
                assert_eq!(data["session_id"], "s1");
                assert_eq!(data["actor_id"], "u1");
            }
            other => panic!("expected ack, got {:?}", other),
        }
        match &replies[1] {
            OutboundMessage::Inventory { resources } => assert_eq!(resources.len(), 9),
            other => panic!("expected inventory, got {:?}", other),
        }
        assert_eq!(
            gw.state(),
            &SessionState::Identified {
                actor_id: "u1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_acquire_then_confirm_via_bound_actor() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");

        gw.handle_text(r#"{"intent":"subscribe","actor_id":"u1"}"#)
            .await;
        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1"}"#)
            .await;
        assert!(ack_success(&replies[0]));

        let replies = gw
            .handle_text(r#"{"intent":"confirm","resource_id":"A1","actor_id":"u1"}"#)
            .await;
        assert!(ack_success(&replies[0]));
        assert_eq!(
            f.service.get_snapshot().await.unwrap()[0].status,
            SeatStatus::Booked
        );
    }

    #[tokio::test]
    async fn test_conflict_is_failed_ack() {
        let f = fixture();
        let mut first = gateway(&f, "s1");
        let mut second = gateway(&f, "s2");

        first
            .handle_text(r#"{"intent":"acquire","resource_id":"B2","actor_id":"u1"}"#)
            .await;
        let replies = second
            .handle_text(r#"{"intent":"acquire","resource_id":"B2","actor_id":"u2"}"#)
            .await;

        assert!(!ack_success(&replies[0]));
        assert_eq!(ack_text(&replies[0]), "seat is already held by another user");
    }

    #[tokio::test]
    async fn test_actor_switch_is_refused() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");

        gw.handle_text(r#"{"intent":"subscribe","actor_id":"u1"}"#)
            .await;
        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1","actor_id":"u2"}"#)
            .await;

        assert!(!ack_success(&replies[0]));
        assert_eq!(
            f.service.get_snapshot().await.unwrap()[0].status,
            SeatStatus::Available
        );
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_session_open() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");

        let replies = gw.handle_text("{{{").await;
        assert!(matches!(
            &replies[0],
            OutboundMessage::Error { code, .. } if code == "malformed"
        ));

        let replies = gw.handle_text(r#"{"intent":"dance"}"#).await;
        assert!(matches!(
            &replies[0],
            OutboundMessage::Error { code, .. } if code == "unknown_intent"
        ));

        // Seat intents need an actor from somewhere
        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1"}"#)
            .await;
        assert!(matches!(
            &replies[0],
            OutboundMessage::Error { code, .. } if code == "missing_field"
        ));

        assert_eq!(gw.state(), &SessionState::Unidentified);
    }

    #[tokio::test]
    async fn test_closed_session_ignores_intents() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");
        gw.close();

        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1","actor_id":"u1"}"#)
            .await;
        assert!(replies.is_empty());
        assert_eq!(
            f.service.get_snapshot().await.unwrap()[0].status,
            SeatStatus::Available
        );
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_reported() {
        let f = fixture();
        let mut gw = gateway(&f, "s1");
        f.repo.fail_reads.store(true, Ordering::SeqCst);

        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1","actor_id":"u1"}"#)
            .await;

        assert!(!ack_success(&replies[0]));
        assert!(ack_text(&replies[0]).starts_with("Service unavailable"));
        // The aborted attempts must not strand locks
        f.repo.fail_reads.store(false, Ordering::SeqCst);
        let replies = gw
            .handle_text(r#"{"intent":"acquire","resource_id":"A1","actor_id":"u1"}"#)
            .await;
        assert!(ack_success(&replies[0]));
    }

    #[tokio::test]
    async fn test_slow_commit_is_awaited_not_cancelled() {
        let f = fixture();
        let mut events = f.bus.subscribe("seats.>").await.unwrap();
        let mut gw = gateway_with(
            &f,
            "s1",
            GatewayConfig {
                engine_call_timeout: Duration::from_millis(50),
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            },
        );
        gw.handle_text(r#"{"intent":"acquire","resource_id":"A1","actor_id":"u1"}"#)
            .await;
        assert_eq!(events.recv().await.unwrap().topic, SeatEventKind::Held.topic());

        // The record write lands at once but the store answers after two timeouts
        f.repo.commit_delay_ms.store(80, Ordering::SeqCst);
        let replies = gw
            .handle_text(r#"{"intent":"confirm","resource_id":"A1","actor_id":"u1"}"#)
            .await;

        assert!(ack_success(&replies[0]));
        assert_eq!(ack_text(&replies[0]), "Seat booked");
        assert_eq!(seat_status(&f, "A1").await, SeatStatus::Booked);
        assert_eq!(f.store.live_lock_count().await, 0);
        assert_eq!(events.recv().await.unwrap().topic, SeatEventKind::Booked.topic());
        assert!(events.try_recv().is_err(), "confirm ran more than once");
    }

    #[tokio::test]
    async fn test_timed_out_call_still_finishes_in_background() {
        let f = fixture();
        let mut events = f.bus.subscribe("seats.>").await.unwrap();
        let mut gw = gateway_with(
            &f,
            "s1",
            GatewayConfig {
                engine_call_timeout: Duration::from_millis(30),
                max_attempts: 1,
                retry_backoff: Duration::from_millis(1),
            },
        );
        gw.handle_text(r#"{"intent":"acquire","resource_id":"B2","actor_id":"u1"}"#)
            .await;
        events.recv().await.unwrap();

        f.repo.commit_delay_ms.store(100, Ordering::SeqCst);
        let replies = gw
            .handle_text(r#"{"intent":"confirm","resource_id":"B2","actor_id":"u1"}"#)
            .await;
        assert!(!ack_success(&replies[0]));
        assert!(ack_text(&replies[0]).contains("timed out"));

        // Lock, record and publish all complete even though the caller gave up
        let booked = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("booked event never published")
            .unwrap();
        assert_eq!(booked.topic, SeatEventKind::Booked.topic());
        assert_eq!(seat_status(&f, "B2").await, SeatStatus::Booked);
        assert_eq!(f.store.live_lock_count().await, 0);
    }
}
