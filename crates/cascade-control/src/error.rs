//! Error types for the stabilization controller
//!
//! Loop errors never escape a running loop: they are recorded on the loop
//! and drive it to `Failed`. Spawn, query and persistence errors return to
//! the caller.

use crate::phase::LoopPhase;
use crate::types::LoopId;
use cascade_forecast::{ForecastError, NodeCategory, NodeId};

/// Result alias used throughout the control crate
pub type ControlResult<T> = Result<T, ControlError>;

/// Main controller error type
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Graph, simulation or topology failure
    #[error(transparent)]
    Forecast(#[from] ForecastError),

    /// Action catalog has nothing for this node
    #[error("no applicable action for {node} ({category})")]
    NoApplicableAction {
        /// Target node
        node: NodeId,
        /// Its category
        category: NodeCategory,
    },

    /// Agent deployment errored, timed out or was rejected
    #[error("agent deployment failed: {0}")]
    DeploymentFailed(String),

    /// One control action was not executed
    #[error("actuation of {action} failed: {reason}")]
    ActuationFailed {
        /// Action tag
        action: String,
        /// Failure description
        reason: String,
    },

    /// Node already has an active loop
    #[error("node {node} already stabilized by loop {owner}")]
    ConcurrentLoopRejected {
        /// Contended node
        node: NodeId,
        /// Loop holding the lock
        owner: LoopId,
    },

    /// Telemetry source unavailable
    #[error("telemetry unavailable: {0}")]
    Telemetry(String),

    /// Snapshot could not be saved or loaded
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Phase change not permitted by the loop state machine
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: LoopPhase,
        /// Requested phase
        to: LoopPhase,
    },

    /// Loop task ended without producing a record
    #[error("loop task aborted: {0}")]
    LoopAborted(String),
}

impl ControlError {
    /// Check if this is a spawn rejection caused by an active loop
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ConcurrentLoopRejected { .. })
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
