//! The caller-facing lock bound to one key.
//!
//! Acquisition is a pure polling protocol. An acquirer reads the record,
//! waits out the record's lease duration and reads it again. An unchanged
//! fencing token means nobody renewed during the window, so the resource is
//! free or abandoned and the acquirer tries to swap in its own token with a
//! conditional update. Any number of contenders may see the same unchanged
//! token and race that update; the store lets exactly one of them through.
//! There is no fairness and no bound on how long a contender may wait.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::LockConfig,
    error::{LockError, Result},
    handle::{status_to_result, LockHandle},
    models::{FencingToken, HoldStatus, LeaseRecord, LockKey},
    store::{CreateOutcome, Store, UpdateOutcome},
};

/// A distributed lock on a single `(partition, sort)` key.
///
/// Runs at most one renewal loop at a time. The lock is not reentrant:
/// calling `acquire` while this resource already holds the lease keeps
/// polling until the current hold is released, exactly like a contender in
/// another process would.
pub struct LockResource {
    store: Arc<dyn Store>,
    key: LockKey,
    config: LockConfig,
    current: Mutex<Option<LockHandle>>,
}

impl LockResource {
    /// Validates `config` and makes sure the lease record for `key` exists.
    ///
    /// Losing the creation race to another participant is the normal case
    /// after the very first start and is not an error.
    pub async fn new(store: Arc<dyn Store>, key: LockKey, config: LockConfig) -> Result<Self> {
        config.validate()?;

        let record = LeaseRecord::new(
            key.clone(),
            FencingToken::generate(),
            config.lease_duration,
            config.owner_name.clone(),
        );
        match store.create_if_absent(&record).await? {
            CreateOutcome::Created => info!(
                "Created lease record {} ({:?} lease, owner {})",
                key, config.lease_duration, config.owner_name
            ),
            CreateOutcome::AlreadyExists => debug!("Lease record {} already exists", key),
        }

        Ok(Self {
            store,
            key,
            config,
            current: Mutex::new(None),
        })
    }

    /// Like [`LockResource::new`] with timings and owner read from the environment.
    pub async fn from_env(store: Arc<dyn Store>, key: LockKey) -> Result<Self> {
        let config = LockConfig::from_env().map_err(|e| LockError::configuration(e.to_string()))?;
        Self::new(store, key, config).await
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Blocks until this resource wins the lease, then starts renewing it.
    ///
    /// Returns the fencing token that won. Store errors abort the wait and
    /// are returned unchanged.
    pub async fn acquire(&self) -> Result<FencingToken> {
        self.acquire_with_progress(|_| {}).await
    }

    /// [`LockResource::acquire`] bounded by `timeout`.
    ///
    /// On expiry no hold is installed. If the deadline lands right after the
    /// winning update, that token is simply never renewed and goes stale
    /// after one lease duration.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<FencingToken> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(LockError::AcquireTimeout {
                key: self.key.to_string(),
                waited: timeout,
            }),
        }
    }

    /// [`LockResource::acquire`] calling `on_attempt` with the 1-based attempt
    /// number before every poll cycle.
    pub async fn acquire_with_progress<F>(&self, mut on_attempt: F) -> Result<FencingToken>
    where
        F: FnMut(u32) + Send,
    {
        let mut attempt: u32 = 0;

        let token = loop {
            attempt = attempt.saturating_add(1);
            on_attempt(attempt);

            let candidate = FencingToken::generate();
            let before = self.read_record().await?;
            sleep(before.lease_duration()).await;
            let after = self.read_record().await?;

            if before.fencing_token != after.fencing_token {
                debug!(
                    "Lease on {} renewed by {} during attempt {}, polling again",
                    self.key, after.owner_name, attempt
                );
                continue;
            }

            match self
                .store
                .update_token_if_matches(
                    &self.key,
                    &after.fencing_token,
                    &candidate,
                    &self.config.owner_name,
                )
                .await?
            {
                UpdateOutcome::Updated => break candidate,
                UpdateOutcome::ConditionFailed => debug!(
                    "Another contender claimed {} first during attempt {}",
                    self.key, attempt
                ),
            }
        };

        self.install(token).await;
        info!(
            "Acquired lease on {} as {} after {} attempt(s)",
            self.key, self.config.owner_name, attempt
        );
        Ok(token)
    }

    /// Stops holding the lease without waiting for the renewal loop.
    ///
    /// A renewal already in flight may still land afterwards; use
    /// [`LockResource::release_and_wait`] to rule that out. Releasing with
    /// nothing held, or twice, is a no-op. If the hold had already been lost,
    /// the loss is reported here once and the hold is cleared.
    pub fn release(&self) -> Result<()> {
        let mut slot = self.slot();
        let Some(handle) = slot.as_ref() else {
            debug!("Release of {} with no hold, nothing to do", self.key);
            return Ok(());
        };

        match handle.status() {
            HoldStatus::Holding => {
                if handle.stop() {
                    info!("Released lease on {}", self.key);
                }
                Ok(())
            }
            HoldStatus::Stopped => Ok(()),
            status @ (HoldStatus::Lost | HoldStatus::Failed(_)) => {
                slot.take();
                status_to_result(&self.key, status)
            }
        }
    }

    /// Stops holding the lease and waits until the renewal loop has exited,
    /// so no write from this hold can land afterwards.
    ///
    /// Reports [`LockError::LeaseLost`] if the hold turned out to be lost.
    pub async fn release_and_wait(&self) -> Result<()> {
        let handle = self.slot().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        if handle.stop() {
            info!("Released lease on {}", self.key);
        }
        let status = handle.join().await?;
        debug!("Renewal loop for {} exited as {:?}", self.key, status);
        status_to_result(&self.key, status)
    }

    /// `true` while a hold is installed, active and renewing successfully.
    pub fn is_held(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| handle.is_active() && handle.status() == HoldStatus::Holding)
    }

    /// The token currently owned, if held.
    pub fn current_token(&self) -> Option<FencingToken> {
        self.slot()
            .as_ref()
            .filter(|handle| handle.is_active() && handle.status() == HoldStatus::Holding)
            .map(LockHandle::held_token)
    }

    /// Status of the installed hold, including a terminal one not yet
    /// collected by a release.
    pub fn hold_status(&self) -> Option<HoldStatus> {
        self.slot().as_ref().map(LockHandle::status)
    }

    async fn read_record(&self) -> Result<LeaseRecord> {
        self.store
            .get(&self.key)
            .await?
            .ok_or_else(|| LockError::RecordMissing {
                key: self.key.to_string(),
            })
    }

    /// Installs a hold for `token`, first making sure the previous renewal
    /// loop of this resource has fully exited.
    async fn install(&self, token: FencingToken) {
        let previous = self.slot().take();
        if let Some(previous) = previous {
            if previous.stop() {
                warn!("Superseding a hold on {} that was still marked active", self.key);
            }
            match previous.join().await {
                Ok(status) => debug!("Previous hold on {} ended as {:?}", self.key, status),
                Err(e) => warn!("Previous renewal loop for {} failed: {}", self.key, e),
            }
        }

        let handle = LockHandle::start(
            Arc::clone(&self.store),
            self.key.clone(),
            self.config.owner_name.clone(),
            self.config.heartbeat_interval,
            token,
        );
        *self.slot() = Some(handle);
    }

    fn slot(&self) -> MutexGuard<'_, Option<LockHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LockResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockResource")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("hold", &self.hold_status())
            .finish()
    }
}
