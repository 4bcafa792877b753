//! Error types for the NetHarness environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The run's driving loop has exited and no longer reads its inbox
    #[error("Control channel closed: {0}")]
    ControlClosed(String),
}

impl EnvError {
    /// Creates a control-closed error.
    pub fn closed(run: impl std::fmt::Display) -> Self {
        Self::ControlClosed(run.to_string())
    }
}
