use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info};

use crate::{
    handle::{lock_state, SharedHoldState},
    models::{FencingToken, HoldStatus, LockKey},
    store::{Store, UpdateOutcome},
};

/// Heartbeat task that republishes a fresh fencing token every
/// `heartbeat_interval` while the hold is active.
///
/// Exits as `Stopped` once the active flag is cleared, `Lost` if a renewal's
/// conditional update is rejected, or `Failed` on a store error. The exit
/// status is written back to the shared state before the task returns.
pub(crate) struct RenewalLoop {
    store: Arc<dyn Store>,
    key: LockKey,
    owner_name: String,
    heartbeat_interval: Duration,
    state: SharedHoldState,
    stop_rx: watch::Receiver<bool>,
}

impl RenewalLoop {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        key: LockKey,
        owner_name: String,
        heartbeat_interval: Duration,
        state: SharedHoldState,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            key,
            owner_name,
            heartbeat_interval,
            state,
            stop_rx,
        }
    }

    pub(crate) async fn run(mut self) -> HoldStatus {
        debug!(
            "Started renewal loop for {} ({:?} interval)",
            self.key, self.heartbeat_interval
        );

        let status = self.renew_until_stopped().await;
        lock_state(&self.state).status = status.clone();

        match &status {
            HoldStatus::Stopped => info!("Renewal loop for {} stopped", self.key),
            HoldStatus::Lost => error!(
                "Lease on {} was taken by another holder while held by {}",
                self.key, self.owner_name
            ),
            HoldStatus::Failed(reason) => {
                error!("Renewal of {} failed, hold abandoned: {}", self.key, reason)
            }
            HoldStatus::Holding => {}
        }

        status
    }

    async fn renew_until_stopped(&mut self) -> HoldStatus {
        loop {
            let held = {
                let state = lock_state(&self.state);
                if !state.active {
                    return HoldStatus::Stopped;
                }
                state.held_token
            };

            let next = FencingToken::generate();
            match self
                .store
                .update_token_if_matches(&self.key, &held, &next, &self.owner_name)
                .await
            {
                Ok(UpdateOutcome::Updated) => {
                    lock_state(&self.state).held_token = next;
                    debug!("Renewed lease on {}", self.key);
                }
                Ok(UpdateOutcome::ConditionFailed) => return HoldStatus::Lost,
                Err(e) => return HoldStatus::Failed(e.to_string()),
            }

            tokio::select! {
                _ = sleep(self.heartbeat_interval) => {}
                changed = self.stop_rx.changed() => {
                    // Sender gone means the handle was dropped.
                    if changed.is_err() {
                        return HoldStatus::Stopped;
                    }
                }
            }
        }
    }
}
