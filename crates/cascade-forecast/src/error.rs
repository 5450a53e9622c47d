//! Error types for the forecast engine
//!
//! Covers:
//! - Graph store integrity (missing endpoints, self loops, duplicates)
//! - Simulation arguments (unknown failure modes, too few trials)
//! - Topology description loading

use crate::types::NodeId;

/// Result alias used throughout the forecast crate
pub type ForecastResult<T> = Result<T, ForecastError>;

/// Main forecast error type
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    /// Node is not present in the dependency graph
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Failure mode tag is not recognized
    #[error("invalid failure mode: {0}")]
    InvalidFailureMode(String),

    /// Trial count below the configured minimum
    #[error("insufficient trials: requested {requested}, minimum {minimum}")]
    InsufficientTrials {
        /// Trials requested by the caller
        requested: usize,
        /// Configured minimum
        minimum: usize,
    },

    /// Edge from a node to itself
    #[error("self loop on node {0}")]
    SelfLoop(NodeId),

    /// Edge already present
    #[error("duplicate edge {source_node} -> {target_node}")]
    DuplicateEdge {
        /// Source endpoint
        source_node: NodeId,
        /// Target endpoint
        target_node: NodeId,
    },

    /// Node id registered twice
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// Topology description violates an invariant
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Topology description could not be parsed
    #[error("topology format error: {0}")]
    TopologyFormat(String),
}

impl ForecastError {
    /// Check if the error reports a missing node
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forecast_error_display() {
        let err = ForecastError::NodeNotFound(NodeId::from("power_main"));
        assert_eq!(err.to_string(), "node not found: power_main");
        assert!(err.is_not_found());
    }

    #[test]
    fn insufficient_trials_display() {
        let err = ForecastError::InsufficientTrials {
            requested: 5,
            minimum: 20,
        };
        assert!(err.to_string().contains("minimum 20"));
        assert!(!err.is_not_found());
    }
}
