use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LockError, Result};

const MAX_KEY_COMPONENT_LEN: usize = 256;

/// Composite identifier of a protected resource: a partition key plus an
/// optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    #[serde(rename = "partition_key")]
    partition: String,
    #[serde(rename = "sort_key", skip_serializing_if = "Option::is_none", default)]
    sort: Option<String>,
}

impl LockKey {
    pub fn new(partition: impl Into<String>, sort: Option<String>) -> Result<Self> {
        let partition = partition.into();
        validate_key_component(&partition, "partition key")?;
        if let Some(sort) = &sort {
            validate_key_component(sort, "sort key")?;
        }
        Ok(Self { partition, sort })
    }

    pub fn partition(partition: impl Into<String>) -> Result<Self> {
        Self::new(partition, None)
    }

    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Result<Self> {
        Self::new(partition, Some(sort.into()))
    }

    pub fn partition_key(&self) -> &str {
        &self.partition
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort.as_deref()
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "{}#{}", self.partition, sort),
            None => f.write_str(&self.partition),
        }
    }
}

/// Validates one component of a [`LockKey`].
///
/// Components must be 1–256 characters and free of control characters.
/// Any other character is allowed since keys are opaque to the store.
pub fn validate_key_component(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LockError::InvalidKey {
            reason: format!("{} cannot be empty", what),
        });
    }

    if value.chars().count() > MAX_KEY_COMPONENT_LEN {
        return Err(LockError::InvalidKey {
            reason: format!("{} cannot exceed {} characters", what, MAX_KEY_COMPONENT_LEN),
        });
    }

    if value.chars().any(char::is_control) {
        return Err(LockError::InvalidKey {
            reason: format!("{} cannot contain control characters", what),
        });
    }

    Ok(())
}

/// Opaque ownership evidence, regenerated on every acquisition and renewal.
///
/// Only identity matters: two tokens are either the same write or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken(Uuid);

impl FencingToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> std::result::Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The persisted shape of a lock, one per protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    #[serde(flatten)]
    pub key: LockKey,
    pub fencing_token: FencingToken,
    pub lease_duration_ms: u64,
    pub owner_name: String,
    pub updated_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn new(
        key: LockKey,
        fencing_token: FencingToken,
        lease_duration: Duration,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            key,
            fencing_token,
            lease_duration_ms: duration_to_millis(lease_duration),
            owner_name: owner_name.into(),
            updated_at: Utc::now(),
        }
    }

    /// The staleness window acquirers wait out before claiming the lock.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

// Rounds up so the stored staleness window is never shorter than configured.
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros().div_ceil(1000)).unwrap_or(u64::MAX)
}

/// Where a hold currently stands, as seen by its renewal loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldStatus {
    /// Renewals are succeeding.
    Holding,
    /// The holder asked to stop and the loop exited without further writes.
    Stopped,
    /// A renewal was rejected: someone else owns the fencing token now.
    Lost,
    /// A renewal hit a store error, so liveness could not be proven.
    Failed(String),
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldStatus::Holding)
    }
}
