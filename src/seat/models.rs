use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Held,
    Booked,
}

/// Authoritative record for one seat
///
/// `held_by` and `expires_at` are only populated while the seat is `Held`.
/// They mirror the seat's lock in the store and are always written together
/// with `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatModel {
    pub id: String,
    pub row: u32,
    pub col: u32,
    pub status: SeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SeatModel {
    /// Creates an available seat at the given zero-based coordinates
    pub fn new(row: u32, col: u32) -> Self {
        Self {
            id: seat_id(row, col),
            row,
            col,
            status: SeatStatus::Available,
            held_by: None,
            expires_at: None,
        }
    }

    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.status == SeatStatus::Held && self.held_by.as_deref() == Some(user_id)
    }

    /// A hold whose expiry equals `now` is already expired
    pub fn hold_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.expires_at) {
            (SeatStatus::Held, Some(expires_at)) => expires_at <= now,
            _ => false,
        }
    }

    pub fn held(&self, user_id: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: SeatStatus::Held,
            held_by: Some(user_id.to_string()),
            expires_at: Some(expires_at),
            ..self.clone()
        }
    }

    pub fn booked(&self) -> Self {
        Self {
            status: SeatStatus::Booked,
            held_by: None,
            expires_at: None,
            ..self.clone()
        }
    }

    pub fn available(&self) -> Self {
        Self {
            status: SeatStatus::Available,
            held_by: None,
            expires_at: None,
            ..self.clone()
        }
    }

    /// Checks the holder/expiry projection matches the status
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SeatStatus::Available | SeatStatus::Booked => {
                self.held_by.is_none() && self.expires_at.is_none()
            }
            SeatStatus::Held => self.held_by.is_some() && self.expires_at.is_some(),
        }
    }
}

/// Row letters run from `A` to `Z`
pub const MAX_VENUE_ROWS: u32 = 26;

/// Seat id for zero-based coordinates: row letter followed by 1-based column (`A1`, `J10`)
pub fn seat_id(row: u32, col: u32) -> String {
    let letter = char::from_u32('A' as u32 + row).unwrap_or('?');
    format!("{}{}", letter, col + 1)
}

/// All seats of a `rows` x `cols` venue in row-major order
pub fn venue_layout(rows: u32, cols: u32) -> Vec<SeatModel> {
    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| SeatModel::new(row, col)))
        .collect()
}
