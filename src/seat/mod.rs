// Public API - what other modules can use
pub use expiry_reaper::{reap_expired_holds, start_expiry_reaper, ReaperConfig};
pub use handlers::{book_seat, list_seats, release_seat, select_seat};
pub use service::{ExpireOutcome, ReservationService};

// Internal modules
pub mod expiry_reaper;
mod handlers;
pub mod models;
pub mod repository;
pub mod service;
mod types;
