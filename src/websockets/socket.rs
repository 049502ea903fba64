use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, warn};

use super::hub::DisconnectReason;

/// Liveness probing and write limits for one connection
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings
    pub ping_interval: Duration,
    /// Silence longer than this disconnects the session
    pub timeout: Duration,
    /// A single frame that takes longer than this to write ends the session
    pub write_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// What arrived from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    /// Any other frame (pong, ping, binary); only proves the peer is alive
    Activity,
    Closed,
}

/// Simple WebSocket abstraction - all we care about is send/receive
#[async_trait]
pub trait SocketWrapper: Send {
    /// Send a text message to the client
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Receive the next frame from the client
    async fn receive_message(&mut self) -> Result<SocketEvent, SocketError>;

    async fn send_ping(&mut self) -> Result<(), SocketError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), SocketError>;
}

/// Handler for incoming WebSocket messages
#[async_trait]
pub trait MessageHandler: Send {
    /// Handles one inbound text frame and returns the replies for this session only
    async fn handle_message(&mut self, message: String) -> Vec<String>;

    /// Called once when the connection ends
    fn on_close(&mut self) {}
}

#[derive(Debug)]
pub enum SocketError {
    ConnectionClosed,
    SendFailed(String),
    ReceiveFailed(String),
    WriteTimeout,
}

/// Direct implementation on axum's WebSocket
#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<SocketEvent, SocketError> {
        match self.next().await {
            Some(Ok(Message::Text(text))) => Ok(SocketEvent::Text(text)),
            Some(Ok(Message::Close(_))) => Ok(SocketEvent::Closed),
            Some(Ok(_)) => Ok(SocketEvent::Activity),
            Some(Err(e)) => Err(SocketError::ReceiveFailed(e.to_string())),
            None => Ok(SocketEvent::Closed),
        }
    }

    async fn send_ping(&mut self) -> Result<(), SocketError> {
        self.send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// Why a connection's run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    ClientClosed,
    Evicted(DisconnectReason),
    HeartbeatTimeout,
    /// A frame could not be written before the write deadline
    WriteTimeout,
    /// The hub dropped the outbound queue
    OutboundClosed,
}

enum Frame {
    Text(String),
    Ping,
    Close,
}

/// Connection represents a managed WebSocket connection
///
/// Broadcasts arrive on the bounded outbound queue filled by the hub.
/// Replies to the session's own intents are written straight to the socket.
pub struct Connection {
    pub session_id: String,
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::Receiver<String>,
    evicted: oneshot::Receiver<DisconnectReason>,
    message_handler: Box<dyn MessageHandler>,
    heartbeat: HeartbeatConfig,
}

impl Connection {
    pub fn new(
        session_id: String,
        socket: Box<dyn SocketWrapper>,
        outbound_receiver: mpsc::Receiver<String>,
        evicted: oneshot::Receiver<DisconnectReason>,
        message_handler: Box<dyn MessageHandler>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            session_id,
            socket,
            outbound_receiver,
            evicted,
            message_handler,
            heartbeat,
        }
    }

    /// Run the connection - handles both sending and receiving until disconnect
    pub async fn run(mut self) -> Result<ConnectionEnd, SocketError> {
        let end = match self.pump().await {
            Err(SocketError::WriteTimeout) => {
                warn!(session_id = %self.session_id, "Write deadline passed, dropping connection");
                Ok(ConnectionEnd::WriteTimeout)
            }
            other => other,
        };

        self.message_handler.on_close();

        // Clean disconnect, unless the peer already stopped reading
        if !matches!(end, Ok(ConnectionEnd::WriteTimeout)) {
            if let Err(e) = self.write(Frame::Close).await {
                debug!(session_id = %self.session_id, error = ?e, "Close frame not sent");
            }
        }
        end
    }

    async fn pump(&mut self) -> Result<ConnectionEnd, SocketError> {
        let mut ping_ticker = interval_at(
            Instant::now() + self.heartbeat.ping_interval,
            self.heartbeat.ping_interval,
        );
        // Pushed forward by every inbound frame
        let read_deadline = sleep(self.heartbeat.timeout);
        tokio::pin!(read_deadline);

        loop {
            tokio::select! {
                biased;

                reason = &mut self.evicted => {
                    return Ok(ConnectionEnd::Evicted(reason.unwrap_or(DisconnectReason::HubShutdown)));
                }

                // Handle outbound messages (from the hub to the client)
                msg = self.outbound_receiver.recv() => {
                    match msg {
                        Some(message) => self.write(Frame::Text(message)).await?,
                        None => return Ok(ConnectionEnd::OutboundClosed),
                    }
                }

                // Handle inbound messages (from client to our app)
                event = self.socket.receive_message() => {
                    match event? {
                        SocketEvent::Text(message) => {
                            read_deadline.as_mut().reset(Instant::now() + self.heartbeat.timeout);
                            for reply in self.message_handler.handle_message(message).await {
                                self.write(Frame::Text(reply)).await?;
                            }
                        }
                        SocketEvent::Activity => {
                            read_deadline.as_mut().reset(Instant::now() + self.heartbeat.timeout);
                        }
                        SocketEvent::Closed => return Ok(ConnectionEnd::ClientClosed),
                    }
                }

                _ = &mut read_deadline => {
                    warn!(
                        session_id = %self.session_id,
                        timeout_ms = self.heartbeat.timeout.as_millis() as u64,
                        "Heartbeat timeout"
                    );
                    return Ok(ConnectionEnd::HeartbeatTimeout);
                }

                _ = ping_ticker.tick() => {
                    self.write(Frame::Ping).await?;
                }
            }
        }
    }

    /// Writes one frame within the write deadline
    async fn write(&mut self, frame: Frame) -> Result<(), SocketError> {
        let socket = &mut self.socket;
        let written = timeout(self.heartbeat.write_timeout, async move {
            match frame {
                Frame::Text(message) => socket.send_message(message).await,
                Frame::Ping => socket.send_ping().await,
                Frame::Close => socket.close().await,
            }
        })
        .await;

        written.map_err(|_| SocketError::WriteTimeout)?
    }
}
