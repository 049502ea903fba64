use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot, RwLock,
};
use tracing::{debug, info, warn};

use crate::shared::AppError;

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's own command queue
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

/// Why the hub dropped a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    /// The session's outbound buffer was full during a broadcast
    SlowConsumer,
    HubShutdown,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub total_broadcasts: u64,
    pub evicted_sessions: u64,
    pub started_at: DateTime<Utc>,
    pub last_broadcast_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub actor_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Point-in-time diagnostics served by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    #[serde(flatten)]
    pub stats: HubStats,
    pub sessions: Vec<SessionInfo>,
}

enum HubCommand {
    Register {
        session_id: String,
        outbound: mpsc::Sender<String>,
        evict: oneshot::Sender<DisconnectReason>,
    },
    Unregister {
        session_id: String,
    },
    Identify {
        session_id: String,
        actor_id: String,
    },
    Broadcast {
        message: String,
        report: oneshot::Sender<BroadcastReport>,
    },
}

struct SessionEntry {
    outbound: mpsc::Sender<String>,
    evict: Option<oneshot::Sender<DisconnectReason>>,
}

/// Handle to the per-process connection hub
///
/// All membership changes and broadcasts are processed one at a time by a
/// single actor task. Cloning the handle is cheap; the actor stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::Sender<HubCommand>,
    diagnostics: Arc<RwLock<HubSnapshot>>,
}

impl ConnectionHub {
    /// Spawns the hub actor and returns its handle
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let diagnostics = Arc::new(RwLock::new(HubSnapshot {
            stats: HubStats {
                active_sessions: 0,
                total_sessions: 0,
                total_broadcasts: 0,
                evicted_sessions: 0,
                started_at: Utc::now(),
                last_broadcast_at: None,
            },
            sessions: Vec::new(),
        }));

        let actor = HubActor {
            sessions: HashMap::new(),
            diagnostics: Arc::clone(&diagnostics),
        };
        tokio::spawn(actor.run(receiver));

        Self {
            commands,
            diagnostics,
        }
    }

    async fn send(&self, command: HubCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Internal("connection hub has stopped".to_string()))
    }

    /// Adds a session; the returned receiver fires if the hub drops it
    pub async fn register(
        &self,
        session_id: &str,
        outbound: mpsc::Sender<String>,
    ) -> Result<oneshot::Receiver<DisconnectReason>, AppError> {
        let (evict, evicted) = oneshot::channel();
        self.send(HubCommand::Register {
            session_id: session_id.to_string(),
            outbound,
            evict,
        })
        .await?;
        Ok(evicted)
    }

    pub async fn unregister(&self, session_id: &str) -> Result<(), AppError> {
        self.send(HubCommand::Unregister {
            session_id: session_id.to_string(),
        })
        .await
    }

    /// Records the actor a session is bound to, for diagnostics
    pub async fn identify(&self, session_id: &str, actor_id: &str) -> Result<(), AppError> {
        self.send(HubCommand::Identify {
            session_id: session_id.to_string(),
            actor_id: actor_id.to_string(),
        })
        .await
    }

    /// Fans a serialized message out to every local session
    ///
    /// Never waits on a session: a full buffer evicts that session instead.
    pub async fn broadcast(&self, message: String) -> Result<BroadcastReport, AppError> {
        let (report, receiver) = oneshot::channel();
        self.send(HubCommand::Broadcast { message, report }).await?;
        receiver
            .await
            .map_err(|_| AppError::Internal("connection hub has stopped".to_string()))
    }

    pub async fn snapshot(&self) -> HubSnapshot {
        self.diagnostics.read().await.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.diagnostics.read().await.stats.active_sessions
    }
}

struct HubActor {
    sessions: HashMap<String, SessionEntry>,
    diagnostics: Arc<RwLock<HubSnapshot>>,
}

impl HubActor {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        info!("Connection hub started");

        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Register {
                    session_id,
                    outbound,
                    evict,
                } => self.register(session_id, outbound, evict).await,
                HubCommand::Unregister { session_id } => self.unregister(&session_id).await,
                HubCommand::Identify {
                    session_id,
                    actor_id,
                } => self.identify(&session_id, actor_id).await,
                HubCommand::Broadcast { message, report } => {
                    let result = self.broadcast(message).await;
                    // Caller may have given up waiting
                    let _ = report.send(result);
                }
            }
        }

        for (session_id, mut entry) in self.sessions.drain() {
            if let Some(evict) = entry.evict.take() {
                let _ = evict.send(DisconnectReason::HubShutdown);
            }
            debug!(session_id = %session_id, "Session dropped at hub shutdown");
        }
        info!("Connection hub stopped");
    }

    async fn register(
        &mut self,
        session_id: String,
        outbound: mpsc::Sender<String>,
        evict: oneshot::Sender<DisconnectReason>,
    ) {
        let entry = SessionEntry {
            outbound,
            evict: Some(evict),
        };
        if self.sessions.insert(session_id.clone(), entry).is_some() {
            warn!(session_id = %session_id, "Session registered twice, replacing");
        }

        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.sessions.retain(|s| s.session_id != session_id);
        diagnostics.sessions.push(SessionInfo {
            session_id: session_id.clone(),
            actor_id: None,
            connected_at: Utc::now(),
        });
        diagnostics.stats.total_sessions += 1;
        diagnostics.stats.active_sessions = self.sessions.len();

        info!(
            session_id = %session_id,
            active_sessions = self.sessions.len(),
            "Session registered"
        );
    }

    async fn unregister(&mut self, session_id: &str) {
        if self.sessions.remove(session_id).is_none() {
            debug!(session_id = %session_id, "Unregister for unknown session");
            return;
        }

        self.forget(session_id).await;
        info!(
            session_id = %session_id,
            active_sessions = self.sessions.len(),
            "Session unregistered"
        );
    }

    async fn identify(&mut self, session_id: &str, actor_id: String) {
        let mut diagnostics = self.diagnostics.write().await;
        if let Some(info) = diagnostics
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            info.actor_id = Some(actor_id);
        }
    }

    async fn broadcast(&mut self, message: String) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut slow = Vec::new();
        let mut gone = Vec::new();

        for (session_id, entry) in self.sessions.iter() {
            match entry.outbound.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => slow.push(session_id.clone()),
                Err(TrySendError::Closed(_)) => gone.push(session_id.clone()),
            }
        }

        for session_id in slow {
            if let Some(mut entry) = self.sessions.remove(&session_id) {
                warn!(session_id = %session_id, "Outbound buffer full, evicting slow consumer");
                if let Some(evict) = entry.evict.take() {
                    let _ = evict.send(DisconnectReason::SlowConsumer);
                }
                self.forget(&session_id).await;
                report.evicted += 1;
            }
        }

        // Connection already ended but has not unregistered yet
        for session_id in gone {
            self.sessions.remove(&session_id);
            self.forget(&session_id).await;
        }

        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.stats.total_broadcasts += 1;
        diagnostics.stats.evicted_sessions += report.evicted as u64;
        diagnostics.stats.last_broadcast_at = Some(Utc::now());

        debug!(
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast fanned out"
        );
        report
    }

    async fn forget(&self, session_id: &str) {
        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.sessions.retain(|s| s.session_id != session_id);
        diagnostics.stats.active_sessions = self.sessions.len();
    }
}
