use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    error::{LockError, Result},
    models::{FencingToken, HoldStatus, LockKey},
    renewal::RenewalLoop,
    store::Store,
};

/// State shared between the caller side of a hold and its renewal loop.
#[derive(Debug)]
pub(crate) struct HoldState {
    pub(crate) held_token: FencingToken,
    pub(crate) active: bool,
    pub(crate) status: HoldStatus,
}

pub(crate) type SharedHoldState = Arc<Mutex<HoldState>>;

// Nothing in HoldState can be left half-written, so a poisoned lock is still usable.
pub(crate) fn lock_state(state: &Mutex<HoldState>) -> MutexGuard<'_, HoldState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One successful acquisition: the token currently held, the active flag and
/// the background renewal task keeping the lease alive.
///
/// Dropping the handle stops the renewal loop without waiting for it, which
/// from the store's point of view is indistinguishable from the holder dying.
pub(crate) struct LockHandle {
    key: LockKey,
    state: SharedHoldState,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<HoldStatus>>,
}

impl LockHandle {
    /// Spawns the renewal loop for a freshly won `token`.
    pub(crate) fn start(
        store: Arc<dyn Store>,
        key: LockKey,
        owner_name: String,
        heartbeat_interval: Duration,
        token: FencingToken,
    ) -> Self {
        let state = Arc::new(Mutex::new(HoldState {
            held_token: token,
            active: true,
            status: HoldStatus::Holding,
        }));
        let (stop_tx, stop_rx) = watch::channel(false);

        let renewal = RenewalLoop::new(
            store,
            key.clone(),
            owner_name,
            heartbeat_interval,
            Arc::clone(&state),
            stop_rx,
        );
        let task = tokio::spawn(renewal.run());

        Self {
            key,
            state,
            stop_tx,
            task: Some(task),
        }
    }

    /// The token most recently written by this hold.
    pub(crate) fn held_token(&self) -> FencingToken {
        lock_state(&self.state).held_token
    }

    pub(crate) fn is_active(&self) -> bool {
        lock_state(&self.state).active
    }

    pub(crate) fn status(&self) -> HoldStatus {
        lock_state(&self.state).status.clone()
    }

    /// Flags the hold inactive and wakes the renewal loop.
    ///
    /// Returns `false` if the hold had already been stopped.
    pub(crate) fn stop(&self) -> bool {
        let was_active = std::mem::replace(&mut lock_state(&self.state).active, false);
        if was_active {
            self.stop_tx.send_replace(true);
        }
        was_active
    }

    /// Waits for the renewal loop to exit and returns how the hold ended.
    ///
    /// Does not stop the loop; call [`LockHandle::stop`] first unless waiting
    /// for a loss is the point.
    pub(crate) async fn join(mut self) -> Result<HoldStatus> {
        let Some(task) = self.task.take() else {
            return Ok(self.status());
        };

        match task.await {
            Ok(status) => Ok(status),
            Err(e) => {
                let reason = format!("renewal task aborted: {}", e);
                lock_state(&self.state).status = HoldStatus::Failed(reason.clone());
                Err(LockError::RenewalFailed {
                    key: self.key.to_string(),
                    reason,
                })
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_state(&self.state);
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("held_token", &state.held_token)
            .field("active", &state.active)
            .field("status", &state.status)
            .finish()
    }
}

/// Maps how a hold ended onto what the caller of release sees.
pub(crate) fn status_to_result(key: &LockKey, status: HoldStatus) -> Result<()> {
    match status {
        HoldStatus::Holding | HoldStatus::Stopped => Ok(()),
        HoldStatus::Lost => Err(LockError::LeaseLost {
            key: key.to_string(),
        }),
        HoldStatus::Failed(reason) => Err(LockError::RenewalFailed {
            key: key.to_string(),
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::LeaseRecord,
        store::{MemoryStore, UpdateOutcome},
    };

    const HEARTBEAT: Duration = Duration::from_millis(100);

    async fn seeded_store(key: &LockKey) -> (Arc<MemoryStore>, FencingToken) {
        let store = Arc::new(MemoryStore::new());
        let token = FencingToken::generate();
        store
            .create_if_absent(&LeaseRecord::new(key.clone(), token, HEARTBEAT * 3, "seed"))
            .await
            .unwrap();
        (store, token)
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_renews_and_stops() {
        let key = LockKey::partition("handle").unwrap();
        let (store, token) = seeded_store(&key).await;

        let handle = LockHandle::start(store.clone(), key.clone(), "me".to_string(), HEARTBEAT, token);
        assert!(handle.is_active());
        assert_eq!(handle.status(), HoldStatus::Holding);

        tokio::time::sleep(HEARTBEAT * 3).await;
        let renewed = handle.held_token();
        assert_ne!(renewed, token);
        assert_eq!(store.get(&key).await.unwrap().unwrap().fencing_token, renewed);

        assert!(handle.stop());
        assert!(!handle.stop());
        assert_eq!(handle.join().await.unwrap(), HoldStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_loss() {
        let key = LockKey::partition("handle-lost").unwrap();
        let (store, token) = seeded_store(&key).await;

        let handle = LockHandle::start(store.clone(), key.clone(), "me".to_string(), HEARTBEAT, token);
        tokio::time::sleep(HEARTBEAT / 2).await;

        let current = store.get(&key).await.unwrap().unwrap().fencing_token;
        let outcome = store
            .update_token_if_matches(&key, &current, &FencingToken::generate(), "thief")
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);

        assert_eq!(handle.join().await.unwrap(), HoldStatus::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_renewal() {
        let key = LockKey::partition("handle-drop").unwrap();
        let (store, token) = seeded_store(&key).await;

        let handle = LockHandle::start(store.clone(), key.clone(), "me".to_string(), HEARTBEAT, token);
        tokio::time::sleep(HEARTBEAT * 2).await;
        drop(handle);
        tokio::time::sleep(HEARTBEAT).await;

        let settled = store.get(&key).await.unwrap().unwrap().fencing_token;
        tokio::time::sleep(HEARTBEAT * 5).await;
        assert_eq!(store.get(&key).await.unwrap().unwrap().fencing_token, settled);
    }

    #[test]
    fn test_status_to_result() {
        let key = LockKey::partition("k").unwrap();
        assert!(status_to_result(&key, HoldStatus::Stopped).is_ok());
        assert!(matches!(
            status_to_result(&key, HoldStatus::Lost),
            Err(LockError::LeaseLost { .. })
        ));
        assert!(matches!(
            status_to_result(&key, HoldStatus::Failed("down".to_string())),
            Err(LockError::RenewalFailed { .. })
        ));
    }
}
