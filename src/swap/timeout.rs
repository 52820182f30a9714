//! Per-swap dead-man timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::id::SwapId;

pub type TimeoutCallback = Arc<dyn Fn(SwapId) + Send + Sync>;

struct Timer {
    generation: u64,
    token: CancellationToken,
}

/// Fires the installed callback for a swap once its timer elapses, unless
/// the timer is cancelled first. At most one timer runs per swap.
pub struct TimeoutService {
    timers: Mutex<HashMap<SwapId, Timer>>,
    next_generation: AtomicU64,
    callback: OnceLock<TimeoutCallback>,
    shutdown: CancellationToken,
}

impl TimeoutService {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            callback: OnceLock::new(),
            shutdown,
        }
    }

    /// Installs the callback. Only the first call has an effect.
    pub fn set_callback(&self, callback: TimeoutCallback) {
        if self.callback.set(callback).is_err() {
            tracing::debug!("timeout callback already installed");
        }
    }

    /// Arms the timer of `swap_id`, replacing a running one.
    pub fn add(self: &Arc<Self>, swap_id: SwapId, after: Duration) {
        let token = self.shutdown.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = Timer {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.lock().insert(swap_id, timer) {
            previous.token.cancel();
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => this.fire(swap_id, generation),
            }
        });
    }

    pub fn cancel(&self, swap_id: &SwapId) {
        if let Some(timer) = self.lock().remove(swap_id) {
            tracing::debug!(swap_id = %swap_id, "timeout cancelled");
            timer.token.cancel();
        }
    }

    pub fn is_armed(&self, swap_id: &SwapId) -> bool {
        self.lock().contains_key(swap_id)
    }

    fn fire(&self, swap_id: SwapId, generation: u64) {
        {
            let mut timers = self.lock();
            match timers.get(&swap_id) {
                Some(timer) if timer.generation == generation => {
                    timers.remove(&swap_id);
                }
                _ => return,
            }
        }

        tracing::info!(swap_id = %swap_id, "swap timed out");
        match self.callback.get() {
            Some(callback) => callback(swap_id),
            None => tracing::warn!(swap_id = %swap_id, "timeout fired without callback"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SwapId, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
