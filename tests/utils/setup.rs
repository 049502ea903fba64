use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use venue::{
    clock::{Clock, ManualClock},
    event::{EventBus, EventPublisher, InMemoryEventBus, PublishPolicy},
    seat::{repository::InMemorySeatRepository, ReservationService},
    websockets::{ConnectionHub, GatewayConfig, HeartbeatConfig, HubConfig, HubSubscription},
    AppState,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// One node wired end to end: engine, bus, hub subscription and hub
pub struct TestSetup {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemorySeatRepository>,
    pub event_bus: Arc<dyn EventBus>,
    pub service: Arc<ReservationService>,
    pub hub: ConnectionHub,
    pub app_state: AppState,
    pub _subscription_handle: JoinHandle<()>,
}

pub struct TestSetupBuilder {
    rows: u32,
    cols: u32,
    hold_ttl: Duration,
    session_buffer_capacity: usize,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            rows: 2,
            cols: 5,
            hold_ttl: Duration::from_secs(30),
            session_buffer_capacity: 64,
        }
    }

    pub fn with_venue(mut self, rows: u32, cols: u32) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn with_hold_ttl(mut self, hold_ttl: Duration) -> Self {
        self.hold_ttl = hold_ttl;
        self
    }

    pub fn with_session_buffer(mut self, capacity: usize) -> Self {
        self.session_buffer_capacity = capacity;
        self
    }

    pub async fn build(self) -> TestSetup {
        let clock = Arc::new(ManualClock::default());
        let shared_clock: Arc<dyn Clock> = clock.clone();

        let repository = Arc::new(InMemorySeatRepository::new(shared_clock.clone()));
        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new(1024));
        let publisher = EventPublisher::new(event_bus.clone(), PublishPolicy::immediate());

        let service = Arc::new(ReservationService::new(
            repository.clone(),
            publisher,
            shared_clock,
            self.hold_ttl,
        ));
        service.provision_venue(self.rows, self.cols).await.unwrap();

        let hub = ConnectionHub::spawn(HubConfig::default());
        let subscription_handle = HubSubscription::new(event_bus.clone(), hub.clone())
            .start()
            .await
            .unwrap();

        let app_state = AppState::new(
            service.clone(),
            hub.clone(),
            GatewayConfig::default(),
            HeartbeatConfig::default(),
            self.session_buffer_capacity,
        );

        TestSetup {
            clock,
            repository,
            event_bus,
            service,
            hub,
            app_state,
            _subscription_handle: subscription_handle,
        }
    }
}
