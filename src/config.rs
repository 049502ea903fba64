use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::event::PublishPolicy;
use crate::seat::{models::MAX_VENUE_ROWS, ReaperConfig};
use crate::websockets::{GatewayConfig, HeartbeatConfig, HubConfig};

/// Process configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// When set, seats and events live in Redis; otherwise in process memory
    pub redis_url: Option<String>,
    pub hold_ttl: Duration,
    pub reaper_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub write_timeout: Duration,
    pub session_buffer_capacity: usize,
    pub engine_call_timeout: Duration,
    pub venue_rows: u32,
    pub venue_cols: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            redis_url: None,
            hold_ttl: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(54),
            heartbeat_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            session_buffer_capacity: 256,
            engine_call_timeout: Duration::from_millis(5000),
            venue_rows: 10,
            venue_cols: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            hold_ttl: Duration::from_secs(parse_or(
                &lookup,
                "HOLD_TTL_SECS",
                defaults.hold_ttl.as_secs(),
            )),
            reaper_interval: Duration::from_secs(parse_or(
                &lookup,
                "REAPER_INTERVAL_SECS",
                defaults.reaper_interval.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            heartbeat_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )),
            write_timeout: Duration::from_secs(parse_or(
                &lookup,
                "WRITE_TIMEOUT_SECS",
                defaults.write_timeout.as_secs(),
            )),
            session_buffer_capacity: parse_or(
                &lookup,
                "SESSION_BUFFER_CAPACITY",
                defaults.session_buffer_capacity,
            ),
            engine_call_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ENGINE_CALL_TIMEOUT_MS",
                defaults.engine_call_timeout.as_millis() as u64,
            )),
            venue_rows: clamp_rows(parse_or(&lookup, "VENUE_ROWS", defaults.venue_rows)),
            venue_cols: parse_or(&lookup, "VENUE_COLS", defaults.venue_cols),
        }
    }

    pub fn reaper(&self) -> ReaperConfig {
        ReaperConfig {
            scan_interval: self.reaper_interval,
        }
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig::default()
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            engine_call_timeout: self.engine_call_timeout,
            ..GatewayConfig::default()
        }
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: self.heartbeat_interval,
            timeout: self.heartbeat_timeout,
            write_timeout: self.write_timeout,
        }
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        PublishPolicy::default()
    }
}

fn clamp_rows(rows: u32) -> u32 {
    if rows > MAX_VENUE_ROWS {
        warn!(
            key = "VENUE_ROWS",
            value = rows,
            max = MAX_VENUE_ROWS,
            "Venue has more rows than seat letters, clamping"
        );
        return MAX_VENUE_ROWS;
    }
    rows
}

/// Zero is rejected too: every numeric setting is a size or a period
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            warn!(key = key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }
    }
}
