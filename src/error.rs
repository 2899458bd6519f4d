//! Error types shared across subsystems.
//!
//! # Taxonomy
//! - `Unavailable`: no live token could be handed out (empty pool or closed scheduler)
//! - `SchedulerError`: an operation attempted after `Scheduler::shutdown`
//! - `AdmissionError`: a node definition rejected before it reaches the scheduler
//!
//! Stale tokens never surface as errors; the scheduler discards them internally.

use thiserror::Error;

/// Returned by operations invoked after the scheduler (or a stats recorder) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,
}

/// Why `Scheduler::acquire` could not hand out a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unavailable {
    /// No node is currently admitted (never populated, or every node removed).
    #[error("no backend nodes are admitted")]
    NoNodes,
    /// The scheduler has been shut down.
    #[error("scheduler is shut down")]
    Closed,
}

impl From<SchedulerError> for Unavailable {
    fn from(_: SchedulerError) -> Self {
        Unavailable::Closed
    }
}

/// Rejection of a node definition by the control surface or config file.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid node address {address:?}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("address {0:?} did not resolve to any IP")]
    NoAddress(String),
    #[error("port must be non-zero")]
    InvalidPort,
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
