use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::seat::models::{SeatModel, SeatStatus};

/// Topic family shared by every seat event
pub const SEAT_TOPIC_PREFIX: &str = "seats";

/// Wildcard subscription covering every seat event kind
pub const ALL_SEAT_EVENTS: &str = "seats.>";

/// Kind of seat state transition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SeatEventKind {
    Held,
    Released,
    Booked,
    AutoReleased,
}

impl SeatEventKind {
    /// Bus topic this kind is published on, e.g. `seats.auto_released`
    pub fn topic(&self) -> String {
        format!("{}.{}", SEAT_TOPIC_PREFIX, self)
    }
}

/// A seat transition that has already been committed to the store
///
/// Events are facts, not commands. `seat` is the full record after the
/// transition, so observers replace their cached copy instead of diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatEvent {
    #[serde(rename = "type")]
    pub kind: SeatEventKind,
    pub seat_id: String,
    /// Actor that caused the transition; for auto releases, the previous holder
    pub user_id: String,
    pub status: SeatStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub seat: SeatModel,
}

impl SeatEvent {
    pub fn new(
        kind: SeatEventKind,
        user_id: &str,
        seat: &SeatModel,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            seat_id: seat.id.clone(),
            user_id: user_id.to_string(),
            status: seat.status,
            timestamp,
            expires_at: seat.expires_at,
            seat: seat.clone(),
        }
    }

    pub fn topic(&self) -> String {
        self.kind.topic()
    }
}
