use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{Level, debug, event};

use super::RefreshCoordinator;
use crate::token::{TokenStore, token_expiry};

/// Time source for expiry math, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Arms a one-shot timer that refreshes the access token shortly before it
/// expires, so that steady-state requests never observe a 401.
///
/// At most one timer is live per scheduler: every `schedule` cancels the
/// previous timer before arming a new one. The timer only wakes and triggers
/// the coordinator; the refresh itself runs as a detached task, so cancelling
/// the timer never cancels a refresh already in flight.
pub struct RefreshScheduler {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    // Bound after construction; Weak so dropping the client stops the cycle.
    coordinator: Mutex<Weak<RefreshCoordinator>>,
}

impl RefreshScheduler {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, margin: Duration) -> Self {
        Self {
            store,
            clock,
            margin,
            timer: Mutex::new(None),
            coordinator: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn bind(&self, coordinator: Weak<RefreshCoordinator>) {
        let mut slot = self
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = coordinator;
    }

    /// Reads the current token and (re)arms the refresh timer.
    ///
    /// No token means nothing to refresh: any armed timer is cancelled and the
    /// call is otherwise a no-op. A token that is already expired, expires
    /// within the margin, or cannot be decoded triggers an immediate refresh
    /// instead of arming a timer.
    pub fn schedule(&self) {
        let Some(token) = self.store.get() else {
            self.cancel();
            debug!("no access token present; refresh timer left unarmed");
            return;
        };

        let deadline = self.clock.now() + self.margin;
        let delay = token_expiry(&token)
            .and_then(|expiry| expiry.duration_since(deadline).ok())
            .unwrap_or(Duration::ZERO);

        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event!(Level::DEBUG, "scheduler.fire");
            if let Some(coordinator) = coordinator.upgrade() {
                tokio::spawn(async move {
                    let _ = coordinator.refresh().await;
                });
            }
        });

        if delay.is_zero() {
            event!(Level::DEBUG, "scheduler.refresh_now");
        } else {
            event!(
                Level::DEBUG,
                delay_ms = delay.as_millis() as u64,
                "scheduler.armed"
            );
        }
        // Abort-and-replace must happen in one lock acquisition: a racing
        // schedule that cancels first and stores later can leak the timer it
        // meant to replace.
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
            event!(Level::DEBUG, "scheduler.cancelled");
        }
        *slot = Some(handle);
    }

    /// Disarms the timer. Idempotent; safe when nothing is armed.
    pub fn cancel(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
            event!(Level::DEBUG, "scheduler.cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        let slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}
