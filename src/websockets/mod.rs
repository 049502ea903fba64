// Public API
pub use gateway::{GatewayConfig, SessionGateway, SessionState};
pub use handler::{health_handler, run_session, stats_handler, websocket_handler};
pub use hub::{
    BroadcastReport, ConnectionHub, DisconnectReason, HubConfig, HubSnapshot, HubStats,
    SessionInfo,
};
pub use messages::{Intent, IntentKind, OutboundMessage, ProtocolError, SeatAction};
pub use socket::{
    Connection, ConnectionEnd, HeartbeatConfig, MessageHandler, SocketError, SocketEvent,
    SocketWrapper,
};
pub use subscription::HubSubscription;

// Internal modules
mod gateway;
mod handler;
mod hub;
mod messages;
mod socket;
mod subscription;
