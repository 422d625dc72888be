use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;

use super::{CreateOutcome, Store, UpdateOutcome};
use crate::{
    error::StoreError,
    models::{FencingToken, LeaseRecord, LockKey},
};

/// In-process store keeping records in a [`DashMap`].
///
/// Each conditional write runs under the shard lock for its key, which gives
/// the per-key atomicity the lock protocol needs. Clones share the same map,
/// so several `LockResource`s built on clones behave like separate processes
/// talking to one table.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<LockKey, LeaseRecord>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Deletes a record out from under the lock, as an operator might.
    pub fn remove(&self, key: &LockKey) -> Option<LeaseRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store switched offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &LockKey) -> Result<Option<LeaseRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<CreateOutcome, StoreError> {
        self.check_available()?;
        match self.records.entry(record.key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(CreateOutcome::Created)
            }
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
        }
    }

    async fn update_token_if_matches(
        &self,
        key: &LockKey,
        expected: &FencingToken,
        new: &FencingToken,
        owner_name: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        self.check_available()?;
        match self.records.get_mut(key) {
            Some(mut record) if record.fencing_token == *expected => {
                record.fencing_token = *new;
                record.owner_name = owner_name.to_string();
                record.updated_at = Utc::now();
                Ok(UpdateOutcome::Updated)
            }
            Some(_) => Ok(UpdateOutcome::ConditionFailed),
            None => {
                debug!("Conditional update on missing record {}", key);
                Ok(UpdateOutcome::ConditionFailed)
            }
        }
    }
}
