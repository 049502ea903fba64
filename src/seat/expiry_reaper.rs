use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use super::service::{ExpireOutcome, ReservationService};
use crate::shared::AppError;

/// Configuration for the expiry reaper
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to scan for expired holds
    pub scan_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(2),
        }
    }
}

/// Starts the background task that returns expired holds to available
///
/// Runs until the task is aborted. A failed scan is logged and retried on
/// the next tick.
#[instrument(skip(reservation_service))]
pub async fn start_expiry_reaper(reservation_service: Arc<ReservationService>, config: ReaperConfig) {
    info!(
        scan_interval_ms = config.scan_interval.as_millis() as u64,
        "Starting hold expiry reaper"
    );

    let mut scan_interval = interval(config.scan_interval);

    loop {
        scan_interval.tick().await;

        match reap_expired_holds(&reservation_service).await {
            Ok(0) => {}
            Ok(released_count) => {
                info!(released_count = released_count, "Expired holds released");
            }
            Err(e) => {
                error!(error = %e, "Expiry scan failed, skipping this cycle");
            }
        }
    }
}

/// Expires every hold whose expiry is at or before now
///
/// Each candidate is re-validated by the service at write time, so a hold
/// confirmed, released or re-taken since the scan is left alone.
#[instrument(skip(reservation_service))]
pub async fn reap_expired_holds(
    reservation_service: &Arc<ReservationService>,
) -> Result<usize, AppError> {
    let now = reservation_service.clock().now();
    let expired_ids: Vec<String> = reservation_service
        .get_snapshot()
        .await?
        .into_iter()
        .filter(|seat| seat.hold_expired(now))
        .map(|seat| seat.id)
        .collect();

    if expired_ids.is_empty() {
        return Ok(0);
    }

    debug!(count = expired_ids.len(), "Found expired holds");

    let mut released_count = 0;

    for seat_id in expired_ids {
        match reservation_service.expire_hold(&seat_id).await {
            Ok(ExpireOutcome::Expired(_)) => released_count += 1,
            Ok(ExpireOutcome::Skipped) => {
                debug!(seat_id = %seat_id, "Hold changed since scan, skipped");
            }
            Err(e) => {
                warn!(
                    seat_id = %seat_id,
                    error = %e,
                    "Failed to expire hold"
                );
            }
        }
    }

    Ok(released_count)
}
