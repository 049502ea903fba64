use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::models::SeatModel;
use crate::clock::Clock;
use crate::shared::AppError;

/// Shared state store holding one record and at most one self-expiring lock per seat
///
/// The lock is the mutual-exclusion primitive. Record writes are
/// compare-and-set so that a writer that validated a stale record loses
/// instead of overwriting a newer transition.
#[async_trait]
pub trait SeatRepository: Send + Sync {
    /// Atomically creates the seat lock if no live lock exists
    async fn try_acquire_lock(
        &self,
        seat_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, AppError>;

    async fn lock_holder(&self, seat_id: &str) -> Result<Option<String>, AppError>;

    /// Deletes the lock only while it is still owned by `holder`
    async fn release_lock(&self, seat_id: &str, holder: &str) -> Result<bool, AppError>;

    async fn get_seat(&self, seat_id: &str) -> Result<Option<SeatModel>, AppError>;

    /// All seat records ordered by row then column
    async fn list_seats(&self) -> Result<Vec<SeatModel>, AppError>;

    /// Replaces the record only if the stored record still equals `expected`
    async fn compare_and_set_seat(
        &self,
        expected: &SeatModel,
        new: &SeatModel,
    ) -> Result<bool, AppError>;

    async fn insert_seat_if_absent(&self, seat: &SeatModel) -> Result<bool, AppError>;
}

fn sort_seats(seats: &mut [SeatModel]) {
    seats.sort_by(|a, b| (a.row, a.col).cmp(&(b.row, b.col)));
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of SeatRepository for development and testing
///
/// Lock expiry is evaluated against the injected clock, so tests can move
/// time forward without sleeping.
pub struct InMemorySeatRepository {
    seats: Mutex<HashMap<String, SeatModel>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySeatRepository {
    /// Creates a new empty in-memory repository
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            seats: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Creates an in-memory repository with pre-populated seats
    pub fn with_seats(clock: Arc<dyn Clock>, seats: Vec<SeatModel>) -> Self {
        let seat_map = seats.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            seats: Mutex::new(seat_map),
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Overwrites a record without any checks
    pub async fn put_seat(&self, seat: SeatModel) {
        self.seats.lock().await.insert(seat.id.clone(), seat);
    }

    /// Number of live (unexpired) locks
    pub async fn live_lock_count(&self) -> usize {
        let now = self.clock.now();
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| lock.expires_at > now)
            .count()
    }
}

#[async_trait]
impl SeatRepository for InMemorySeatRepository {
    #[instrument(skip(self))]
    async fn try_acquire_lock(
        &self,
        seat_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::InvalidRequest(format!("Invalid lock ttl: {}", e)))?;
        let now = self.clock.now();

        let mut locks = self.locks.lock().await;
        if let Some(existing) = locks.get(seat_id) {
            if existing.expires_at > now {
                debug!(seat_id = %seat_id, holder = %existing.holder, "Lock already held");
                return Ok(false);
            }
        }

        locks.insert(
            seat_id.to_string(),
            LockEntry {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        debug!(seat_id = %seat_id, holder = %holder, "Lock acquired in memory");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn lock_holder(&self, seat_id: &str) -> Result<Option<String>, AppError> {
        let now = self.clock.now();
        let locks = self.locks.lock().await;
        Ok(locks
            .get(seat_id)
            .filter(|lock| lock.expires_at > now)
            .map(|lock| lock.holder.clone()))
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, seat_id: &str, holder: &str) -> Result<bool, AppError> {
        let mut locks = self.locks.lock().await;
        match locks.get(seat_id) {
            Some(lock) if lock.holder == holder => {
                locks.remove(seat_id);
                debug!(seat_id = %seat_id, holder = %holder, "Lock released in memory");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn get_seat(&self, seat_id: &str) -> Result<Option<SeatModel>, AppError> {
        Ok(self.seats.lock().await.get(seat_id).cloned())
    }

    #[instrument(skip(self))]
    async fn list_seats(&self) -> Result<Vec<SeatModel>, AppError> {
        let mut seats: Vec<SeatModel> = self.seats.lock().await.values().cloned().collect();
        sort_seats(&mut seats);
        Ok(seats)
    }

    #[instrument(skip(self, expected, new), fields(seat_id = %expected.id))]
    async fn compare_and_set_seat(
        &self,
        expected: &SeatModel,
        new: &SeatModel,
    ) -> Result<bool, AppError> {
        let mut seats = self.seats.lock().await;
        match seats.get_mut(&expected.id) {
            Some(current) if current == expected => {
                *current = new.clone();
                Ok(true)
            }
            Some(_) => {
                debug!("Seat changed since it was read, write rejected");
                Ok(false)
            }
            None => Err(AppError::NotFound(format!("seat {} not found", expected.id))),
        }
    }

    #[instrument(skip(self, seat), fields(seat_id = %seat.id))]
    async fn insert_seat_if_absent(&self, seat: &SeatModel) -> Result<bool, AppError> {
        let mut seats = self.seats.lock().await;
        if seats.contains_key(&seat.id) {
            return Ok(false);
        }
        seats.insert(seat.id.clone(), seat.clone());
        Ok(true)
    }
}

/// Hash holding every seat record, keyed by seat id
pub const SEATS_KEY: &str = "venue:seats";

pub fn lock_key(seat_id: &str) -> String {
    format!("seat:{}:lock", seat_id)
}

const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current == ARGV[2] then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
    return 1
end
return 0
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed SeatRepository shared by every engine instance
#[derive(Clone)]
pub struct RedisSeatRepository {
    conn: ConnectionManager,
}

impl RedisSeatRepository {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        info!("Connecting seat repository to Redis");

        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;
        let conn = ConnectionManager::new(client).await.map_err(map_redis_err)?;

        info!("Seat repository connected to Redis");
        Ok(Self { conn })
    }

    fn encode(seat: &SeatModel) -> Result<String, AppError> {
        serde_json::to_string(seat)
            .map_err(|e| AppError::Internal(format!("Failed to encode seat: {}", e)))
    }

    fn decode(seat_id: &str, raw: &str) -> Result<SeatModel, AppError> {
        serde_json::from_str(raw).map_err(|e| {
            AppError::Internal(format!("Failed to decode seat {}: {}", seat_id, e))
        })
    }
}

/// Lock TTL as whole milliseconds for `PX`; sub-millisecond TTLs round up to 1
fn lock_ttl_millis(ttl: Duration) -> Result<u64, AppError> {
    u64::try_from(ttl.as_millis())
        .map(|ms| ms.max(1))
        .map_err(|_| AppError::InvalidRequest(format!("hold ttl {:?} is out of range", ttl)))
}

fn map_redis_err(e: redis::RedisError) -> AppError {
    AppError::Transient(format!("Redis error: {}", e))
}

#[async_trait]
impl SeatRepository for RedisSeatRepository {
    #[instrument(skip(self))]
    async fn try_acquire_lock(
        &self,
        seat_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let ttl_ms = lock_ttl_millis(ttl)?;

        // SET key holder PX ttl NX
        let result: Option<String> = redis::cmd("SET")
            .arg(lock_key(seat_id))
            .arg(holder)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(result.is_some())
    }

    #[instrument(skip(self))]
    async fn lock_holder(&self, seat_id: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = redis::cmd("GET")
            .arg(lock_key(seat_id))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(holder)
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, seat_id: &str, holder: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_LOCK_SCRIPT)
            .key(lock_key(seat_id))
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn get_seat(&self, seat_id: &str) -> Result<Option<SeatModel>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(SEATS_KEY)
            .arg(seat_id)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        raw.map(|raw| Self::decode(seat_id, &raw)).transpose()
    }

    #[instrument(skip(self))]
    async fn list_seats(&self) -> Result<Vec<SeatModel>, AppError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(SEATS_KEY)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        let mut seats = Vec::with_capacity(raw.len());
        for (seat_id, value) in raw {
            match Self::decode(&seat_id, &value) {
                Ok(seat) => seats.push(seat),
                Err(e) => warn!(seat_id = %seat_id, error = %e, "Skipping unreadable seat record"),
            }
        }
        sort_seats(&mut seats);
        Ok(seats)
    }

    #[instrument(skip(self, expected, new), fields(seat_id = %expected.id))]
    async fn compare_and_set_seat(
        &self,
        expected: &SeatModel,
        new: &SeatModel,
    ) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let swapped: i64 = Script::new(COMPARE_AND_SET_SCRIPT)
            .key(SEATS_KEY)
            .arg(&expected.id)
            .arg(Self::encode(expected)?)
            .arg(Self::encode(new)?)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(swapped == 1)
    }

    #[instrument(skip(self, seat), fields(seat_id = %seat.id))]
    async fn insert_seat_if_absent(&self, seat: &SeatModel) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let inserted: bool = redis::cmd("HSETNX")
            .arg(SEATS_KEY)
            .arg(&seat.id)
            .arg(Self::encode(seat)?)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(inserted)
    }
}
