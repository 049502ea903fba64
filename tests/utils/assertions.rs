//! Test assertion helpers - fluent API for verifying test expectations
#![allow(dead_code)] // Test utilities may not all be used in every test

use tokio::time::{sleep, Duration};

use venue::{
    event::{SeatEvent, SeatEventKind},
    seat::models::{SeatModel, SeatStatus},
    websockets::OutboundMessage,
};

use super::mocks::MockClient;

// ============================================================================
// Message Matching
// ============================================================================

pub trait MessageMatch {
    fn is_ack_for(&self, intent: &str) -> bool;
    fn is_inventory(&self) -> bool;
    fn is_update(&self, kind: SeatEventKind) -> bool;
    fn is_error(&self) -> bool;
}

impl MessageMatch for OutboundMessage {
    fn is_ack_for(&self, expected: &str) -> bool {
        matches!(self, OutboundMessage::Ack { intent, .. } if intent == expected)
    }

    fn is_inventory(&self) -> bool {
        matches!(self, OutboundMessage::Inventory { .. })
    }

    fn is_update(&self, kind: SeatEventKind) -> bool {
        matches!(self, OutboundMessage::ResourceUpdate { event } if event.kind == kind)
    }

    fn is_error(&self) -> bool {
        matches!(self, OutboundMessage::Error { .. })
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

pub struct MessageAssertion<'a> {
    clients: Vec<&'a MockClient>,
}

impl<'a> MessageAssertion<'a> {
    pub fn for_client(client: &'a MockClient) -> Self {
        Self {
            clients: vec![client],
        }
    }

    pub fn for_clients(clients: Vec<&'a MockClient>) -> Self {
        Self { clients }
    }

    /// Assert every client receives an ack for `intent` (consumes it)
    pub async fn received_ack(self, intent: &str) -> AckContent {
        let mut acks = vec![];
        for client in &self.clients {
            let message = client.consume_where(|m| m.is_ack_for(intent)).await;
            match message {
                Some(OutboundMessage::Ack {
                    success,
                    message,
                    data,
                    ..
                }) => acks.push(AckContent {
                    success,
                    message,
                    data,
                }),
                _ => panic!("{} should have received a {} ack", client.session_id, intent),
            }
        }
        acks.remove(0)
    }

    /// Assert every client observes the same seat event of `kind` (consumes it)
    pub async fn received_update(self, kind: SeatEventKind) -> UpdateContent {
        let mut events: Vec<SeatEvent> = vec![];
        for client in &self.clients {
            match client.consume_where(|m| m.is_update(kind)).await {
                Some(OutboundMessage::ResourceUpdate { event }) => events.push(event),
                _ => panic!(
                    "{} should have received a {} update",
                    client.session_id, kind
                ),
            }
        }

        let first = events.remove(0);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(
                event,
                &first,
                "{} saw a different event than {}",
                self.clients[i + 1].session_id,
                self.clients[0].session_id
            );
        }
        UpdateContent { event: first }
    }

    /// Assert every client observed these seat events in this order (consumes them)
    pub async fn received_update_sequence(self, expected: Vec<SeatEventKind>) {
        for client in &self.clients {
            for (i, kind) in expected.iter().enumerate() {
                let message = client
                    .consume_where(|m| matches!(m, OutboundMessage::ResourceUpdate { .. }))
                    .await;
                match message {
                    Some(OutboundMessage::ResourceUpdate { event }) => assert_eq!(
                        event.kind, *kind,
                        "{} update {} has wrong kind",
                        client.session_id, i
                    ),
                    _ => panic!("{} is missing update {} ({})", client.session_id, i, kind),
                }
            }
        }
    }

    /// Assert no seat events arrive within a short settle period
    pub async fn received_no_updates(self) {
        sleep(Duration::from_millis(50)).await;
        for client in &self.clients {
            let updates = client
                .messages()
                .into_iter()
                .filter(|m| matches!(m, OutboundMessage::ResourceUpdate { .. }))
                .count();
            assert_eq!(
                updates, 0,
                "{} should not have received seat updates",
                client.session_id
            );
        }
    }

    /// Count seat events currently buffered for a client (non-consuming)
    pub fn count_updates(client: &MockClient) -> usize {
        client
            .messages()
            .into_iter()
            .filter(|m| matches!(m, OutboundMessage::ResourceUpdate { .. }))
            .count()
    }
}

// ============================================================================
// Message Content Assertions
// ============================================================================

pub struct AckContent {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl AckContent {
    pub fn succeeded(self) -> Self {
        assert!(self.success, "expected success, got failure: {}", self.message);
        self
    }

    /// Assert the ack is a failure whose message contains `fragment`
    pub fn failed_with(self, fragment: &str) -> Self {
        assert!(!self.success, "expected failure, got: {}", self.message);
        assert!(
            self.message.contains(fragment),
            "failure message {:?} should contain {:?}",
            self.message,
            fragment
        );
        self
    }

    pub fn with_message(self, expected: &str) -> Self {
        assert_eq!(self.message, expected);
        self
    }

    pub fn with_seat_status(self, expected: SeatStatus) -> Self {
        let seat: SeatModel = serde_json::from_value(
            self.data.clone().expect("ack should carry the seat record"),
        )
        .unwrap();
        assert_eq!(seat.status, expected);
        self
    }
}

pub struct UpdateContent {
    pub event: SeatEvent,
}

impl UpdateContent {
    pub fn for_seat(self, seat_id: &str) -> Self {
        assert_eq!(self.event.seat_id, seat_id);
        self
    }

    pub fn by_user(self, user_id: &str) -> Self {
        assert_eq!(self.event.user_id, user_id);
        self
    }

    pub fn with_status(self, expected: SeatStatus) -> Self {
        assert_eq!(self.event.status, expected);
        assert_eq!(self.event.seat.status, expected);
        self
    }
}
