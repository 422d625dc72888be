use std::time::Duration;

use thiserror::Error;

/// Failures raised by a [`Store`](crate::store::Store) backend.
///
/// Conditional-write rejections are not errors; they come back as
/// [`CreateOutcome::AlreadyExists`](crate::store::CreateOutcome) or
/// [`UpdateOutcome::ConditionFailed`](crate::store::UpdateOutcome).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid lease table name: {0:?}")]
    InvalidTable(String),

    #[error("Corrupt lease record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Unified error type for lock construction, acquisition and release.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Invalid lock configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid lock key: {reason}")]
    InvalidKey { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Lease record not found: {key}")]
    RecordMissing { key: String },

    #[error("Lease lost for {key}: fencing token was replaced by another holder")]
    LeaseLost { key: String },

    #[error("Lease renewal failed for {key}: {reason}")]
    RenewalFailed { key: String, reason: String },

    #[error("Timed out after {waited:?} waiting to acquire {key}")]
    AcquireTimeout { key: String, waited: Duration },
}

impl LockError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        LockError::Configuration {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
