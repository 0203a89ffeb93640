use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{RefreshScheduler, Refresher};
use crate::errors::Error;
use crate::telemetry::refresh::RefreshTelemetry;
use crate::token::TokenStore;

/// Callback run when the session becomes unrecoverable, so the host can drop
/// its profile state and route to the sign-in screen.
pub type SessionExpiredHook = Box<dyn Fn() + Send + Sync>;

struct RefreshState {
    refreshing: bool,
    // Non-empty only while `refreshing`; drained exactly once per cycle.
    waiters: Vec<oneshot::Sender<Result<String, Error>>>,
}

/// Serializes refresh cycles: at most one refresh call is in flight at any
/// time, no matter how many requests observe a 401 concurrently.
///
/// The first caller of [`refresh`](Self::refresh) becomes the leader and
/// issues the single refresh call; every caller that arrives while that call
/// is pending registers as a subscriber and receives the leader's outcome.
/// The reactive path (401 responses) and the proactive path (the expiry
/// scheduler firing) both enter here, so the mutual-exclusion invariant holds
/// uniformly.
pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn Refresher>,
    scheduler: Arc<RefreshScheduler>,
    state: Mutex<RefreshState>,
    on_session_expired: Option<SessionExpiredHook>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn Refresher>,
        scheduler: Arc<RefreshScheduler>,
        on_session_expired: Option<SessionExpiredHook>,
    ) -> Self {
        Self {
            store,
            refresher,
            scheduler,
            state: Mutex::new(RefreshState {
                refreshing: false,
                waiters: Vec::new(),
            }),
            on_session_expired,
        }
    }

    /// Start-or-join entry point for a refresh cycle.
    ///
    /// Returns the new access token. On failure every joined caller gets
    /// [`Error::SessionExpired`] and the session is torn down: token cleared,
    /// timer cancelled, expiry hook run.
    pub async fn refresh(&self) -> Result<String, Error> {
        // Checked and set in one synchronous section, before any await, so
        // concurrent callers cannot both become the leader.
        let waiter = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("refresh already in flight; subscribing to its outcome");
            return match rx.await {
                Ok(outcome) => outcome,
                // Leader dropped without settling.
                Err(_) => Err(Error::SessionExpired),
            };
        }

        let mut guard = SettleGuard {
            coordinator: self,
            settled: false,
        };
        let telemetry = RefreshTelemetry::new("refresh.cycle");
        telemetry.emit_start(SystemTime::now());
        let outcome = self.refresher.refresh().await;
        guard.settled = true;

        let waiters = self.drain();
        match outcome {
            Ok(token) => {
                // Order matters: the token must be readable and the timer
                // rearmed before any subscriber replays its request.
                self.store.set(&token);
                self.scheduler.schedule();
                telemetry.emit_success(waiters.len(), SystemTime::now());
                for tx in waiters {
                    let _ = tx.send(Ok(token.clone()));
                }
                Ok(token)
            }
            Err(err) => {
                telemetry.emit_failure(&err, waiters.len(), SystemTime::now());
                self.expire_session();
                for tx in waiters {
                    let _ = tx.send(Err(Error::SessionExpired));
                }
                Err(Error::SessionExpired)
            }
        }
    }

    /// Tears the session down: token cleared, timer disarmed, host notified.
    pub fn expire_session(&self) {
        self.store.clear();
        self.scheduler.cancel();
        if let Some(hook) = &self.on_session_expired {
            hook();
        }
        warn!("session torn down; re-authentication required");
    }

    fn drain(&self) -> Vec<oneshot::Sender<Result<String, Error>>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    }
}

/// Fails pending subscribers if the leader future is dropped mid-refresh, so
/// they never hang on a cycle that will not settle.
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        for tx in self.coordinator.drain() {
            let _ = tx.send(Err(Error::SessionExpired));
        }
    }
}
