//! Error types for a find-providers run.
//!
//! A run reports exactly one terminal error. Its `Display` names the phase that
//! failed followed by the underlying cause.

use std::fmt;

use thiserror::Error;

use crate::deadline::DeadlineExceeded;

/// Phase of the scenario a terminal error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    Coordinating,
    Bootstrapping,
    Warming,
    Providing,
    FindingProviders,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Configuring => "configuring",
            Phase::Coordinating => "coordinating",
            Phase::Bootstrapping => "bootstrapping",
            Phase::Warming => "warming",
            Phase::Providing => "providing",
            Phase::FindingProviders => "finding providers",
        };
        f.write_str(name)
    }
}

/// Failure of a single provide / find-providers operation
#[derive(Debug, Error)]
pub enum OperationError {
    /// The run deadline expired while the operation was in flight
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The backend reported an error
    #[error("{0:#}")]
    Backend(anyhow::Error),

    /// The operation task panicked or was aborted
    #[error("operation task failed: {0}")]
    Join(String),
}

impl OperationError {
    /// Classify a backend error, recognising deadline expiry reported by the backend itself
    pub fn from_backend(err: anyhow::Error) -> Self {
        if err.is::<DeadlineExceeded>() {
            OperationError::DeadlineExceeded
        } else {
            OperationError::Backend(err)
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, OperationError::DeadlineExceeded)
    }
}

impl From<DeadlineExceeded> for OperationError {
    fn from(_: DeadlineExceeded) -> Self {
        OperationError::DeadlineExceeded
    }
}

/// Terminal error of a run
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid run parameters: {0:#}")]
    Config(anyhow::Error),

    #[error("coordination failed: {0:#}")]
    Coordination(anyhow::Error),

    #[error("bootstrap failed: {0:#}")]
    Bootstrap(anyhow::Error),

    #[error("random walk failed: {0:#}")]
    RandomWalk(anyhow::Error),

    #[error("failed while providing: {0}")]
    Provide(#[source] OperationError),

    #[error("failed while finding providers: {0}")]
    FindProviders(#[source] OperationError),
}

impl ScenarioError {
    pub fn phase(&self) -> Phase {
        match self {
            ScenarioError::Config(_) => Phase::Configuring,
            ScenarioError::Coordination(_) => Phase::Coordinating,
            ScenarioError::Bootstrap(_) => Phase::Bootstrapping,
            ScenarioError::RandomWalk(_) => Phase::Warming,
            ScenarioError::Provide(_) => Phase::Providing,
            ScenarioError::FindProviders(_) => Phase::FindingProviders,
        }
    }

    /// The per-operation failure, for errors raised while executing
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            ScenarioError::Provide(e) | ScenarioError::FindProviders(e) => Some(e),
            _ => None,
        }
    }
}
