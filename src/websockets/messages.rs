use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::event::SeatEvent;
use crate::seat::models::SeatModel;

/// Intent names accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum IntentKind {
    Subscribe,
    Acquire,
    Confirm,
    Release,
}

/// Seat mutations a session can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SeatAction {
    Acquire,
    Confirm,
    Release,
}

/// Inbound frame as sent by the client, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawIntent {
    pub intent: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// A validated client intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Subscribe {
        actor_id: Option<String>,
    },
    Seat {
        action: SeatAction,
        resource_id: String,
        actor_id: Option<String>,
    },
}

/// Typed protocol failure, reported to the session without closing it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnknownIntent(_) => "unknown_intent",
            ProtocolError::MissingField(_) => "missing_field",
        }
    }
}

/// Blank strings count as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Intent {
    /// Parses and validates one inbound text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawIntent =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = IntentKind::from_str(&raw.intent)
            .map_err(|_| ProtocolError::UnknownIntent(raw.intent.clone()))?;
        let actor_id = non_blank(raw.actor_id);

        let action = match kind {
            IntentKind::Subscribe => return Ok(Intent::Subscribe { actor_id }),
            IntentKind::Acquire => SeatAction::Acquire,
            IntentKind::Confirm => SeatAction::Confirm,
            IntentKind::Release => SeatAction::Release,
        };

        let resource_id =
            non_blank(raw.resource_id).ok_or(ProtocolError::MissingField("resource_id"))?;

        Ok(Intent::Seat {
            action,
            resource_id,
            actor_id,
        })
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Subscribe { .. } => IntentKind::Subscribe,
            Intent::Seat { action, .. } => match action {
                SeatAction::Acquire => IntentKind::Acquire,
                SeatAction::Confirm => IntentKind::Confirm,
                SeatAction::Release => IntentKind::Release,
            },
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Intent::Subscribe { actor_id } | Intent::Seat { actor_id, .. } => actor_id.as_deref(),
        }
    }
}

/// Everything the server sends to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Direct reply to one intent of this session
    Ack {
        intent: String,
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// A seat transition observed on the bus
    ResourceUpdate { event: SeatEvent },
    /// Full seat map
    Inventory { resources: Vec<SeatModel> },
    Error { code: String, message: String },
}

/// Helper functions for creating messages
impl OutboundMessage {
    pub fn ack_ok(intent: IntentKind, message: &str, data: Option<serde_json::Value>) -> Self {
        Self::Ack {
            intent: intent.to_string(),
            success: true,
            message: message.to_string(),
            data,
        }
    }

    pub fn ack_failed(intent: IntentKind, message: String) -> Self {
        Self::Ack {
            intent: intent.to_string(),
            success: false,
            message,
            data: None,
        }
    }

    pub fn resource_update(event: SeatEvent) -> Self {
        Self::ResourceUpdate { event }
    }

    pub fn inventory(resources: Vec<SeatModel>) -> Self {
        Self::Inventory { resources }
    }

    pub fn protocol_error(error: &ProtocolError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
