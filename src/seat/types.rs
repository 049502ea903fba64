use serde::{Deserialize, Serialize};

/// Request payload shared by select, book and release
#[derive(Debug, Default, Deserialize)]
pub struct SeatActionRequest {
    #[serde(default)]
    pub seat_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl SeatActionRequest {
    pub fn is_complete(&self) -> bool {
        !self.seat_id.trim().is_empty() && !self.user_id.trim().is_empty()
    }
}

/// Response for a successful seat action
#[derive(Debug, Serialize, Deserialize)]
pub struct SeatActionResponse {
    pub message: String,
}

impl SeatActionResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
