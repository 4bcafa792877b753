//! Run control channel: requests from callers to a run's driving loop.

use crate::error::EnvError;
use crate::types::RunId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A request queued for a run's own driving loop.
///
/// Callers never mutate a run's counters directly; they enqueue one of these
/// and the driver applies it at its next tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage<D> {
    /// Stop the run and freeze its partial metrics
    Stop,

    /// A run-specific directive (e.g. fault injection)
    Directive(D),
}

/// Caller side of a run's control channel.
///
/// Cloneable; every clone shares the same stop latch.
///
/// # Message Flow
///
/// ```text
/// Caller                   Channel                   Driver
///   |                         |                         |
///   |-- request_stop() ------>|                         |
///   |   (returns at once)     |                         |
///   |                         |---- next tick --------->|-- drain() -> [Stop]
/// ```
#[derive(Debug)]
pub struct ControlHandle<D> {
    run_id: RunId,
    tx: mpsc::UnboundedSender<ControlMessage<D>>,
    stop_requested: Arc<AtomicBool>,
}

impl<D> Clone for ControlHandle<D> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            tx: self.tx.clone(),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }
}

/// Driver side of a run's control channel.
#[derive(Debug)]
pub struct ControlInbox<D> {
    rx: mpsc::UnboundedReceiver<ControlMessage<D>>,
}

/// Creates a connected handle/inbox pair for one run.
pub fn control_channel<D>(run_id: RunId) -> (ControlHandle<D>, ControlInbox<D>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ControlHandle {
            run_id,
            tx,
            stop_requested: Arc::new(AtomicBool::new(false)),
        },
        ControlInbox { rx },
    )
}

impl<D> ControlHandle<D> {
    /// Returns the run this handle controls.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Requests a stop.
    ///
    /// # Returns
    /// * `Ok(true)` - This call latched the stop and enqueued it
    /// * `Ok(false)` - A stop was already requested by an earlier call
    /// * `Err(EnvError::ControlClosed)` - The driver has already exited
    ///
    /// Never blocks waiting for the driver.
    pub fn request_stop(&self) -> Result<bool, EnvError> {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.tx
            .send(ControlMessage::Stop)
            .map_err(|_| EnvError::closed(self.run_id))?;
        Ok(true)
    }

    /// Returns true once any clone has requested a stop.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Enqueues a run-specific directive.
    pub fn send(&self, directive: D) -> Result<(), EnvError> {
        self.tx
            .send(ControlMessage::Directive(directive))
            .map_err(|_| EnvError::closed(self.run_id))
    }

    /// Returns true if the driver has dropped its inbox.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<D> ControlInbox<D> {
    /// Takes every pending message without waiting.
    pub fn drain(&mut self) -> Vec<ControlMessage<D>> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}
