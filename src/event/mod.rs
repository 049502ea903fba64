// Event distribution between the reservation engine and realtime observers
//
// The engine publishes committed seat transitions; every connection hub
// subscribes to the wildcard topic and fans them out to its sessions.

// Public API - what other modules can use
pub use bus::{
    next_backoff, topic_matches, BusMessage, EventBus, InMemoryEventBus, RedisEventBus,
    RESUBSCRIBE_BACKOFF_MIN,
};
pub use events::{SeatEvent, SeatEventKind, ALL_SEAT_EVENTS};
pub use publisher::{EventPublisher, PublishPolicy};

#[cfg(test)]
pub use publisher::test_support;

// Internal modules
mod bus;
mod events;
mod publisher;
