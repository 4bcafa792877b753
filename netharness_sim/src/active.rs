//! Table of in-flight runs and the snapshots their drivers publish.

use netharness_env::{ControlHandle, RunId};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Milliseconds since the UNIX epoch (0 before it).
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Readable text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("driver panicked: {}", detail)
}

struct Slot<T, D> {
    control: ControlHandle<D>,
    snapshot: Arc<RwLock<T>>,
    done: watch::Receiver<bool>,
}

/// Driver side of a slot: the only writer of the run's snapshot.
pub struct Publisher<T> {
    snapshot: Arc<RwLock<T>>,
    done: watch::Sender<bool>,
}

impl<T> Publisher<T> {
    pub fn publish(&self, value: T) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Wakes every waiter. Call after the run is in history.
    pub fn finish(self) {
        let _ = self.done.send(true);
    }
}

/// Runs that have not yet been moved to history.
pub struct ActiveRuns<T, D> {
    slots: RwLock<HashMap<RunId, Slot<T, D>>>,
}

impl<T: Clone, D> ActiveRuns<T, D> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a run and returns the publisher for its driver.
    pub fn insert(&self, id: RunId, control: ControlHandle<D>, initial: T) -> Publisher<T> {
        let snapshot = Arc::new(RwLock::new(initial));
        let (done_tx, done_rx) = watch::channel(false);
        self.slots.write().unwrap_or_else(PoisonError::into_inner).insert(
            id,
            Slot {
                control,
                snapshot: Arc::clone(&snapshot),
                done: done_rx,
            },
        );
        Publisher {
            snapshot,
            done: done_tx,
        }
    }

    pub fn remove(&self, id: RunId) {
        self.slots.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    /// Latest published snapshot.
    pub fn get(&self, id: RunId) -> Option<T> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|slot| slot.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub fn control(&self, id: RunId) -> Option<ControlHandle<D>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|slot| slot.control.clone())
    }

    /// Snapshots of every tracked run, in no particular order.
    pub fn snapshots(&self) -> Vec<T> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|slot| slot.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until the run's driver has finished; returns at once for
    /// unknown ids.
    pub async fn wait_done(&self, id: RunId) -> bool {
        let done = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|slot| slot.done.clone());
        let Some(mut done) = done else {
            return false;
        };
        loop {
            if *done.borrow_and_update() {
                return true;
            }
            if done.changed().await.is_err() {
                return true;
            }
        }
    }
}

impl<T: Clone, D> Default for ActiveRuns<T, D> {
    fn default() -> Self {
        Self::new()
    }
}
