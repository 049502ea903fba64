use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration, Instant};

use venue::{
    seat::reap_expired_holds,
    websockets::{run_session, DisconnectReason},
};

use super::assertions::MessageMatch;
use super::mocks::{MockClient, MockSocket, RECEIVE_TIMEOUT};
use super::setup::TestSetup;

// ============================================================================
// Action Helpers
// ============================================================================

impl TestSetup {
    /// Opens a session over a mock socket; the session runs until disconnected
    pub fn connect(&self, session_id: &str) -> MockClient {
        let (socket, inbound, sent) = MockSocket::new();
        let task = tokio::spawn(run_session(
            Box::new(socket),
            session_id.to_string(),
            self.app_state.clone(),
        ));
        MockClient::new(session_id.to_string(), inbound, sent, task)
    }

    /// Connects and subscribes as `actor_id`, consuming the ack and the seat map
    pub async fn connect_as(&self, session_id: &str, actor_id: &str) -> MockClient {
        let client = self.connect(session_id);
        client.subscribe(actor_id);
        client
            .consume_where(|m| m.is_ack_for("subscribe"))
            .await
            .unwrap_or_else(|| panic!("{} was not subscribed", session_id));
        client
            .consume_where(|m| m.is_inventory())
            .await
            .unwrap_or_else(|| panic!("{} got no seat map", session_id));
        client
    }

    /// Registers a session whose consumer never reads
    ///
    /// The returned receiver must be kept alive, otherwise the hub sees a
    /// closed queue instead of a full one.
    pub async fn register_stalled_session(
        &self,
        session_id: &str,
        capacity: usize,
    ) -> (mpsc::Receiver<String>, oneshot::Receiver<DisconnectReason>) {
        let (outbound, receiver) = mpsc::channel(capacity);
        let evicted = self.hub.register(session_id, outbound).await.unwrap();
        (receiver, evicted)
    }

    /// Waits until the hub reports `expected` active sessions
    pub async fn wait_for_sessions(&self, expected: usize) {
        let deadline = Instant::now() + RECEIVE_TIMEOUT;
        while self.hub.session_count().await != expected {
            assert!(
                Instant::now() < deadline,
                "hub never reached {} sessions (has {})",
                expected,
                self.hub.session_count().await
            );
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until the hub has processed every command sent before this call
    ///
    /// The hub handles commands in order, so a broadcast round trip is enough.
    /// Clients see the marker as a frame that is not a server message.
    pub async fn sync_hub(&self) {
        self.hub.broadcast("sync".to_string()).await.unwrap();
    }

    /// Moves the shared clock forward, e.g. past a hold's expiry
    pub fn advance_clock(&self, by: Duration) {
        self.clock
            .advance(chrono::Duration::from_std(by).unwrap());
    }

    /// Runs one reaper cycle and returns how many holds it expired
    pub async fn reap(&self) -> usize {
        reap_expired_holds(&self.service).await.unwrap()
    }
}

impl MockClient {
    pub fn subscribe(&self, actor_id: &str) {
        self.send_text(&json!({"intent": "subscribe", "actor_id": actor_id}).to_string());
    }

    pub fn acquire(&self, resource_id: &str, actor_id: &str) {
        self.send_intent("acquire", resource_id, actor_id);
    }

    pub fn confirm(&self, resource_id: &str, actor_id: &str) {
        self.send_intent("confirm", resource_id, actor_id);
    }

    pub fn release(&self, resource_id: &str, actor_id: &str) {
        self.send_intent("release", resource_id, actor_id);
    }

    fn send_intent(&self, intent: &str, resource_id: &str, actor_id: &str) {
        self.send_text(
            &json!({
                "intent": intent,
                "resource_id": resource_id,
                "actor_id": actor_id,
            })
            .to_string(),
        );
    }
}
