use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use venue::websockets::{ConnectionEnd, OutboundMessage, SocketError, SocketEvent, SocketWrapper};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// How long a mock client waits for an expected message
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Socket fed by the test; every frame the server sends is recorded
pub struct MockSocket {
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockSocket {
    pub fn new() -> (Self, mpsc::UnboundedSender<SocketEvent>, Arc<Mutex<Vec<String>>>) {
        let (tx, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inbound,
                sent: sent.clone(),
            },
            tx,
            sent,
        )
    }
}

#[async_trait]
impl SocketWrapper for MockSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<SocketEvent, SocketError> {
        match self.inbound.recv().await {
            Some(event) => Ok(event),
            None => Ok(SocketEvent::Closed),
        }
    }

    async fn send_ping(&mut self) -> Result<(), SocketError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        Ok(())
    }
}

/// Test-side handle of one connected session
pub struct MockClient {
    pub session_id: String,
    inbound: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    pub task: JoinHandle<Option<ConnectionEnd>>,
}

impl MockClient {
    pub fn new(
        session_id: String,
        inbound: mpsc::UnboundedSender<SocketEvent>,
        sent: Arc<Mutex<Vec<String>>>,
        task: JoinHandle<Option<ConnectionEnd>>,
    ) -> Self {
        Self {
            session_id,
            inbound,
            sent,
            task,
        }
    }

    pub fn send_text(&self, text: &str) {
        self.inbound
            .send(SocketEvent::Text(text.to_string()))
            .unwrap();
    }

    pub fn disconnect(&self) {
        let _ = self.inbound.send(SocketEvent::Closed);
    }

    /// Everything received so far that parses as a server message (non-consuming)
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    /// Waits for the first message matching `predicate` and removes it
    pub async fn consume_where<F>(&self, predicate: F) -> Option<OutboundMessage>
    where
        F: Fn(&OutboundMessage) -> bool,
    {
        let deadline = Instant::now() + RECEIVE_TIMEOUT;
        loop {
            {
                let mut sent = self.sent.lock().unwrap();
                let position = sent.iter().position(|raw| {
                    serde_json::from_str::<OutboundMessage>(raw)
                        .map(|message| predicate(&message))
                        .unwrap_or(false)
                });
                if let Some(index) = position {
                    let raw = sent.remove(index);
                    return serde_json::from_str(&raw).ok();
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}
