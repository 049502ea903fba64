use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::{
    models::{venue_layout, SeatModel, SeatStatus},
    repository::SeatRepository,
};
use crate::{
    clock::Clock,
    event::{EventPublisher, SeatEvent, SeatEventKind},
    shared::{AppError, ConflictReason},
};

/// Record writes retried after losing a compare-and-set race
const MAX_RECORD_WRITE_ATTEMPTS: u32 = 3;

/// Result of an expiry attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The hold was expired and the seat is available again
    Expired(SeatModel),
    /// Nothing to do: not held, not yet expired, or another writer got there first
    Skipped,
}

/// Service owning every seat state transition
///
/// All transitions go through the per-seat lock in the repository, and
/// every record write is a compare-and-set against the record that was
/// validated. Events are published only after the write has committed.
pub struct ReservationService {
    repository: Arc<dyn SeatRepository>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

impl ReservationService {
    pub fn new(
        repository: Arc<dyn SeatRepository>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            hold_ttl,
        }
    }

    /// Hold duration used when callers do not supply one
    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Creates any missing seats of a `rows` x `cols` venue
    ///
    /// Existing records are left untouched, so restarting a node never
    /// resets holds or bookings. Returns how many seats were created.
    #[instrument(skip(self))]
    pub async fn provision_venue(&self, rows: u32, cols: u32) -> Result<usize, AppError> {
        let mut created = 0;
        for seat in venue_layout(rows, cols) {
            if self.repository.insert_seat_if_absent(&seat).await? {
                created += 1;
            }
        }

        info!(
            rows = rows,
            cols = cols,
            created = created,
            "Venue provisioned"
        );
        Ok(created)
    }

    /// Every seat ordered by row then column
    #[instrument(skip(self))]
    pub async fn get_snapshot(&self) -> Result<Vec<SeatModel>, AppError> {
        let seats = self.repository.list_seats().await?;
        debug!(seat_count = seats.len(), "Seat snapshot retrieved");
        Ok(seats)
    }

    /// Holds a seat for `user_id` using the default hold duration
    pub async fn select_seat(&self, seat_id: &str, user_id: &str) -> Result<SeatModel, AppError> {
        self.acquire_hold(seat_id, user_id, self.hold_ttl).await
    }

    /// Places an exclusive, self-expiring hold on a seat
    ///
    /// Re-acquiring a seat you already hold is a conflict; it does not
    /// extend the hold.
    #[instrument(skip(self))]
    pub async fn acquire_hold(
        &self,
        seat_id: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<SeatModel, AppError> {
        if !self
            .repository
            .try_acquire_lock(seat_id, user_id, ttl)
            .await?
        {
            let holder = self.repository.lock_holder(seat_id).await?;
            debug!(seat_id = %seat_id, user_id = %user_id, holder = ?holder, "Seat lock is taken");

            let reason = match holder {
                Some(holder) if holder == user_id => ConflictReason::AlreadyHeldByYou,
                holder => ConflictReason::HeldByOther { holder },
            };
            return Err(AppError::Conflict(reason));
        }

        let held = match self.write_hold(seat_id, user_id, ttl).await {
            Ok(seat) => seat,
            Err(e) => {
                self.release_lock_after_failure(seat_id, user_id).await;
                return Err(e);
            }
        };

        info!(
            seat_id = %seat_id,
            user_id = %user_id,
            expires_at = ?held.expires_at,
            "Seat held"
        );

        self.notify(SeatEventKind::Held, user_id, &held).await;
        Ok(held)
    }

    /// Turns the caller's hold into a permanent booking
    #[instrument(skip(self))]
    pub async fn confirm_book(&self, seat_id: &str, user_id: &str) -> Result<SeatModel, AppError> {
        let booked = self
            .finish_hold(seat_id, user_id, SeatEventKind::Booked)
            .await?;
        info!(seat_id = %seat_id, user_id = %user_id, "Seat booked");
        Ok(booked)
    }

    /// Gives the caller's hold back
    #[instrument(skip(self))]
    pub async fn release_hold(&self, seat_id: &str, user_id: &str) -> Result<SeatModel, AppError> {
        let released = self
            .finish_hold(seat_id, user_id, SeatEventKind::Released)
            .await?;
        info!(seat_id = %seat_id, user_id = %user_id, "Seat released");
        Ok(released)
    }

    /// Returns a held seat to available once its hold has run out
    ///
    /// Safe to call repeatedly and concurrently: only the caller whose write
    /// lands reports `Expired` and publishes, everyone else sees `Skipped`.
    #[instrument(skip(self))]
    pub async fn expire_hold(&self, seat_id: &str) -> Result<ExpireOutcome, AppError> {
        let seat = match self.repository.get_seat(seat_id).await? {
            Some(seat) => seat,
            None => {
                debug!(seat_id = %seat_id, "Expiry requested for unknown seat");
                return Ok(ExpireOutcome::Skipped);
            }
        };

        let now = self.clock.now();
        if !seat.hold_expired(now) {
            return Ok(ExpireOutcome::Skipped);
        }

        let previous_holder = seat.held_by.clone().unwrap_or_default();
        let released = seat.available();

        if !self
            .repository
            .compare_and_set_seat(&seat, &released)
            .await?
        {
            debug!(seat_id = %seat_id, "Seat changed before expiry landed");
            return Ok(ExpireOutcome::Skipped);
        }

        // Normally the lock has lapsed on its own already
        match self
            .repository
            .release_lock(seat_id, &previous_holder)
            .await
        {
            Ok(true) => debug!(seat_id = %seat_id, "Removed lingering lock of expired hold"),
            Ok(false) => {}
            Err(e) => warn!(seat_id = %seat_id, error = %e, "Failed to remove lock of expired hold"),
        }

        info!(
            seat_id = %seat_id,
            previous_holder = %previous_holder,
            "Hold expired, seat released"
        );

        self.notify(SeatEventKind::AutoReleased, &previous_holder, &released)
            .await;
        Ok(ExpireOutcome::Expired(released))
    }

    /// Writes the held record while the caller owns the lock
    async fn write_hold(
        &self,
        seat_id: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<SeatModel, AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::InvalidRequest(format!("Invalid hold ttl: {}", e)))?;

        for attempt in 1..=MAX_RECORD_WRITE_ATTEMPTS {
            let seat = self.require_seat(seat_id).await?;
            if seat.status == SeatStatus::Booked {
                return Err(AppError::Conflict(ConflictReason::AlreadyBooked));
            }

            // Without a live lock any leftover hold on the record is stale
            let held = seat.held(user_id, self.clock.now() + ttl);
            if self.repository.compare_and_set_seat(&seat, &held).await? {
                return Ok(held);
            }

            debug!(seat_id = %seat_id, attempt = attempt, "Seat record changed, re-reading");
        }

        Err(AppError::Transient(format!(
            "seat {} kept changing while being held",
            seat_id
        )))
    }

    /// Shared path for confirm and release: both end a hold owned by `user_id`
    async fn finish_hold(
        &self,
        seat_id: &str,
        user_id: &str,
        kind: SeatEventKind,
    ) -> Result<SeatModel, AppError> {
        let seat = self.require_seat(seat_id).await?;

        match self.repository.lock_holder(seat_id).await? {
            None => return Err(AppError::Forbidden("seat is not held".to_string())),
            Some(holder) if holder != user_id => {
                return Err(AppError::Forbidden("you do not hold this seat".to_string()))
            }
            Some(_) => {}
        }

        if !seat.is_held_by(user_id) {
            return Err(AppError::Forbidden("seat is not held by you".to_string()));
        }

        let next = match kind {
            SeatEventKind::Booked => seat.booked(),
            _ => seat.available(),
        };

        if !self.repository.compare_and_set_seat(&seat, &next).await? {
            warn!(seat_id = %seat_id, user_id = %user_id, "Hold changed while finishing it");
            return Err(AppError::Forbidden("seat is not held by you".to_string()));
        }

        // The record is committed from here on, so lock cleanup never fails the call
        match self.repository.release_lock(seat_id, user_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(seat_id = %seat_id, user_id = %user_id, "Lock already gone after finishing hold")
            }
            Err(e) => warn!(
                seat_id = %seat_id,
                user_id = %user_id,
                error = %e,
                "Lock release failed after finishing hold, it will lapse on its TTL"
            ),
        }

        self.notify(kind, user_id, &next).await;
        Ok(next)
    }

    async fn require_seat(&self, seat_id: &str) -> Result<SeatModel, AppError> {
        self.repository
            .get_seat(seat_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("seat {} not found", seat_id)))
    }

    /// An orphaned lock would still lapse after its TTL
    async fn release_lock_after_failure(&self, seat_id: &str, user_id: &str) {
        if let Err(e) = self.repository.release_lock(seat_id, user_id).await {
            error!(
                seat_id = %seat_id,
                user_id = %user_id,
                error = %e,
                "Failed to release lock after aborted hold"
            );
        }
    }

    /// Publishing failures never undo a committed transition
    async fn notify(&self, kind: SeatEventKind, user_id: &str, seat: &SeatModel) {
        let event = SeatEvent::new(kind, user_id, seat, self.clock.now());
        self.publisher.publish_with_retry(&event).await;
    }
}
