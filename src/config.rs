use std::{env, time::Duration};

use uuid::Uuid;

use crate::error::{LockError, Result};

const DEFAULT_LEASE_DURATION_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and identity of one lock participant.
///
/// `lease_duration` must be at least twice `heartbeat_interval` so that a live
/// holder always renews inside any staleness window an acquirer waits out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub owner_name: String,
}

impl LockConfig {
    pub fn new(
        lease_duration: Duration,
        heartbeat_interval: Duration,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            lease_duration,
            heartbeat_interval,
            owner_name: owner_name.into(),
        }
    }

    /// Checks the lease/heartbeat ratio. Exactly 2× is accepted.
    ///
    /// The heartbeat must be at least one millisecond, the resolution of both
    /// the timer driving renewals and the stored lease duration.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            return Err(LockError::configuration(format!(
                "heartbeat_interval ({:?}) must be at least {:?}",
                self.heartbeat_interval, MIN_HEARTBEAT_INTERVAL
            )));
        }

        let min_lease = self.heartbeat_interval.checked_mul(2).ok_or_else(|| {
            LockError::configuration(format!(
                "heartbeat_interval ({:?}) is too large",
                self.heartbeat_interval
            ))
        })?;
        if self.lease_duration < min_lease {
            return Err(LockError::configuration(format!(
                "lease_duration ({:?}) must be at least twice heartbeat_interval ({:?})",
                self.lease_duration, self.heartbeat_interval
            )));
        }

        if self.owner_name.is_empty() {
            return Err(LockError::configuration("owner_name cannot be empty"));
        }

        Ok(())
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(LockConfig {
            lease_duration: duration_ms_var("FENCELOCK_LEASE_DURATION_MS", DEFAULT_LEASE_DURATION_MS)?,
            heartbeat_interval: duration_ms_var(
                "FENCELOCK_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?,
            owner_name: env::var("FENCELOCK_OWNER_NAME").unwrap_or_else(|_| default_owner_name()),
        })
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_LEASE_DURATION_MS),
            Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            default_owner_name(),
        )
    }
}

/// Where the SQLite-backed store keeps its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub table_name: String,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        StoreConfig {
            database_url: env::var("FENCELOCK_DATABASE_URL")
                .unwrap_or_else(|_| "fencelock.db".to_string()),
            table_name: env::var("FENCELOCK_TABLE")
                .unwrap_or_else(|_| "distributed_locks".to_string()),
        }
    }
}

fn default_owner_name() -> String {
    format!("fencelock-{}", Uuid::new_v4())
}

fn duration_ms_var(name: &str, default_ms: u64) -> anyhow::Result<Duration> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| anyhow::anyhow!("{} must be a whole number of milliseconds, got {:?}", name, raw)),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}
