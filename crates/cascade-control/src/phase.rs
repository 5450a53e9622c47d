//! Stabilization loop phases
//!
//! ```text
//! Monitoring -> RiskDetected -> IntentGenerated -> AgentDeploying
//!            -> InfrastructureControlling -> Evaluating -> Stable | Recovering | Failed
//! ```
//!
//! Any non-terminal phase may move to `Failed`. Terminal phases have no
//! outgoing transitions.

use crate::error::{ControlError, ControlResult};
use crate::types::LoopStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Loop state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Waiting for a risk
    Monitoring,
    /// Risk detected, loop spawned
    RiskDetected,
    /// Intent generated
    IntentGenerated,
    /// Agents being deployed
    AgentDeploying,
    /// Control actions being issued
    InfrastructureControlling,
    /// Measuring effectiveness
    Evaluating,
    /// Terminal: effective
    Stable,
    /// Terminal: partially effective
    Recovering,
    /// Terminal: ineffective or aborted
    Failed,
}

impl LoopPhase {
    /// All phases, in lifecycle order
    pub const ALL: [LoopPhase; 9] = [
        LoopPhase::Monitoring,
        LoopPhase::RiskDetected,
        LoopPhase::IntentGenerated,
        LoopPhase::AgentDeploying,
        LoopPhase::InfrastructureControlling,
        LoopPhase::Evaluating,
        LoopPhase::Stable,
        LoopPhase::Recovering,
        LoopPhase::Failed,
    ];

    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPhase::Monitoring => "monitoring",
            LoopPhase::RiskDetected => "risk_detected",
            LoopPhase::IntentGenerated => "intent_generated",
            LoopPhase::AgentDeploying => "agent_deploying",
            LoopPhase::InfrastructureControlling => "infrastructure_controlling",
            LoopPhase::Evaluating => "evaluating",
            LoopPhase::Stable => "stable",
            LoopPhase::Recovering => "recovering",
            LoopPhase::Failed => "failed",
        }
    }

    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        allowed_transitions(*self).is_empty()
    }

    /// Coarse status for this phase
    #[must_use]
    pub fn status(&self) -> LoopStatus {
        match self {
            LoopPhase::Monitoring | LoopPhase::RiskDetected => LoopStatus::AtRisk,
            LoopPhase::IntentGenerated
            | LoopPhase::AgentDeploying
            | LoopPhase::InfrastructureControlling
            | LoopPhase::Evaluating => LoopStatus::Stabilizing,
            LoopPhase::Stable => LoopStatus::Stable,
            LoopPhase::Recovering => LoopStatus::Recovering,
            LoopPhase::Failed => LoopStatus::Failed,
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: LoopPhase) -> Vec<LoopPhase> {
    match from {
        LoopPhase::Monitoring => vec![LoopPhase::RiskDetected, LoopPhase::Failed],
        LoopPhase::RiskDetected => vec![LoopPhase::IntentGenerated, LoopPhase::Failed],
        LoopPhase::IntentGenerated => vec![LoopPhase::AgentDeploying, LoopPhase::Failed],
        LoopPhase::AgentDeploying => vec![LoopPhase::InfrastructureControlling, LoopPhase::Failed],
        LoopPhase::InfrastructureControlling => vec![LoopPhase::Evaluating, LoopPhase::Failed],
        LoopPhase::Evaluating => vec![LoopPhase::Stable, LoopPhase::Recovering, LoopPhase::Failed],
        LoopPhase::Stable | LoopPhase::Recovering | LoopPhase::Failed => vec![],
    }
}

/// Validate a phase transition
///
/// # Errors
/// - `ControlError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: LoopPhase, to: LoopPhase) -> ControlResult<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ControlError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            LoopPhase::Monitoring,
            LoopPhase::RiskDetected,
            LoopPhase::IntentGenerated,
            LoopPhase::AgentDeploying,
            LoopPhase::InfrastructureControlling,
            LoopPhase::Evaluating,
            LoopPhase::Stable,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn skipping_phases_is_rejected() {
        assert!(validate_transition(LoopPhase::RiskDetected, LoopPhase::Evaluating).is_err());
        assert!(validate_transition(LoopPhase::Stable, LoopPhase::Failed).is_err());
        assert!(matches!(
            validate_transition(LoopPhase::IntentGenerated, LoopPhase::Stable),
            Err(ControlError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn terminal_phases() {
        let terminal: Vec<LoopPhase> = LoopPhase::ALL
            .into_iter()
            .filter(LoopPhase::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![LoopPhase::Stable, LoopPhase::Recovering, LoopPhase::Failed]
        );
        for phase in terminal {
            assert!(phase.status().is_terminal());
        }
    }
}
