//! Debounced write-back.
//!
//! A single timer slot: `schedule` replaces whatever is armed, `reset`
//! disarms it. Fired writes, explicit saves, and conflict overwrites all run
//! under one async write lock so the store never sees two of our writes at
//! once.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio::task::JoinHandle,
    tracing::{debug, trace},
};

#[derive(Default)]
struct Slot {
    /// Bumped by every `schedule` and `reset`; a timer only fires if the
    /// generation it was armed with is still the latest.
    generation: u64,
    armed: Option<JoinHandle<()>>,
}

/// Coalesces bursts of edits into one delayed write.
pub struct AutosaveDebouncer {
    delay: Duration,
    slot: Arc<Mutex<Slot>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AutosaveDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Arc::new(Mutex::new(Slot::default())),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer. Only the most recently scheduled `write`
    /// runs, once the delay elapses without another `schedule` or `reset`.
    pub fn schedule<F, Fut>(&self, write: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.armed.take() {
            previous.abort();
            trace!(generation, "autosave timer re-armed");
        }

        let delay = self.delay;
        let slot_ref = Arc::clone(&self.slot);
        let write_lock = Arc::clone(&self.write_lock);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = slot_ref.lock().unwrap_or_else(|e| e.into_inner());
                if slot.generation != generation {
                    return;
                }
                // Fired: from here on `reset` no longer reaches this write.
                slot.armed = None;
            }
            let _guard = write_lock.lock().await;
            debug!(generation, "autosave firing");
            write().await;
        });
        slot.armed = Some(handle);
    }

    /// Disarm a pending timer without firing it. A write that already fired
    /// is left to finish. Returns whether a timer was disarmed.
    pub fn reset(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.generation += 1;
        match slot.armed.take() {
            Some(handle) => {
                handle.abort();
                debug!("autosave timer cancelled");
                true
            },
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .armed
            .is_some()
    }

    /// Run `write` now under the write lock, after disarming the timer.
    pub async fn run_now<F, Fut, T>(&self, write: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.reset();
        self.exclusive(write).await
    }

    /// Run `f` under the write lock without touching the timer.
    pub async fn exclusive<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.write_lock.lock().await;
        f().await
    }
}

impl Drop for AutosaveDebouncer {
    fn drop(&mut self) {
        self.reset();
    }
}
