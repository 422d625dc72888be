//! The conditional-write store contract consumed by the lock core.
//!
//! A backend must make [`Store::create_if_absent`] and
//! [`Store::update_token_if_matches`] atomic per key and serve strongly
//! consistent reads. Everything the lock guarantees rests on that.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{FencingToken, LeaseRecord, LockKey},
};

/// Result of a put-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of an update-if-token-matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    ConditionFailed,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Strongly consistent read of the record for `key`.
    async fn get(&self, key: &LockKey) -> Result<Option<LeaseRecord>, StoreError>;

    /// Writes `record` only if no record exists under its key.
    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<CreateOutcome, StoreError>;

    /// Replaces the fencing token with `new` only if the stored token is
    /// `expected`. `owner_name` is refreshed alongside for diagnostics.
    ///
    /// A missing record fails the condition.
    async fn update_token_if_matches(
        &self,
        key: &LockKey,
        expected: &FencingToken,
        new: &FencingToken,
        owner_name: &str,
    ) -> Result<UpdateOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_store(_: &dyn Store) {}
}
