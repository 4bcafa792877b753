//! Error taxonomy shared by every harness operation.

use thiserror::Error;

/// Coarse error classes, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown topology/node/test/generation/profile id
    NotFound,
    /// Malformed topology/profile/scenario input, rejected before any mutation
    InvalidSpec,
    /// Request against a run that already reached a terminal status
    AlreadyTerminal,
    /// Internal synthesis or node-simulation error during a run
    SimulationFault,
    /// History repository backend failure
    Storage,
}

/// Harness errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Topology not found: {0}")]
    TopologyNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Load profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Test run not found: {0}")]
    TestNotFound(String),

    #[error("Generation not found: {0}")]
    GenerationNotFound(String),

    #[error("Invalid topology spec: {0}")]
    InvalidTopologySpec(String),

    #[error("Invalid load profile: {0}")]
    InvalidLoadProfile(String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("Invalid transaction pattern: {0}")]
    InvalidPattern(String),

    #[error("Run {0} already finished")]
    AlreadyTerminal(String),

    #[error("Simulation fault: {0}")]
    SimulationFault(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl HarnessError {
    /// Returns the coarse class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TopologyNotFound(_)
            | Self::NodeNotFound(_)
            | Self::ProfileNotFound(_)
            | Self::TestNotFound(_)
            | Self::GenerationNotFound(_) => ErrorKind::NotFound,
            Self::InvalidTopologySpec(_)
            | Self::InvalidLoadProfile(_)
            | Self::InvalidScenario(_)
            | Self::InvalidPattern(_) => ErrorKind::InvalidSpec,
            Self::AlreadyTerminal(_) => ErrorKind::AlreadyTerminal,
            Self::SimulationFault(_) => ErrorKind::SimulationFault,
            Self::StorageError(_) => ErrorKind::Storage,
        }
    }

    /// Creates a simulation fault.
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::SimulationFault(msg.into())
    }
}
