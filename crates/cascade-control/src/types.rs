//! Core types for the stabilization controller
//!
//! Defines:
//! - Loop, detection and intent identifiers
//! - Risk types and detections
//! - Control actions and stabilization intents
//! - Loop records and effectiveness metrics

use crate::learning::LearningUpdate;
use crate::phase::LoopPhase;
use cascade_forecast::{FailureMode, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Unique stabilization loop identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoopId(pub Ulid);

impl LoopId {
    /// Generate new loop ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LoopId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique risk detection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectionId(pub Ulid);

impl DetectionId {
    /// Generate new detection ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DetectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique stabilization intent identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntentId(pub Ulid);

impl IntentId {
    /// Generate new intent ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monitored risk signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    /// Analytic cascade probability estimate
    CascadeProbability,
    /// Load as a fraction of capacity
    InfrastructureOverload,
    /// One minus health
    FailureRate,
}

impl RiskType {
    /// All risk types, in evaluation order
    pub const ALL: [RiskType; 3] = [
        RiskType::CascadeProbability,
        RiskType::InfrastructureOverload,
        RiskType::FailureRate,
    ];

    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskType::CascadeProbability => "cascade_probability",
            RiskType::InfrastructureOverload => "infrastructure_overload",
            RiskType::FailureRate => "failure_rate",
        }
    }

    /// Detection confidence for this signal
    #[must_use]
    pub fn confidence(&self) -> f64 {
        match self {
            RiskType::CascadeProbability => 0.75,
            RiskType::InfrastructureOverload => 0.9,
            RiskType::FailureRate => 0.85,
        }
    }

    /// Failure mode used when simulating this risk
    #[must_use]
    pub fn failure_mode(&self) -> FailureMode {
        match self {
            RiskType::InfrastructureOverload => FailureMode::Overload,
            RiskType::CascadeProbability | RiskType::FailureRate => FailureMode::EquipmentFailure,
        }
    }
}

impl fmt::Display for RiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk raised by the monitor for one node
///
/// Carries the threshold in force when it was raised; loops never re-read
/// thresholds from the learning store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDetection {
    /// Unique id
    pub detection_id: DetectionId,
    /// Detection time
    pub detected_at: DateTime<Utc>,
    /// Node the risk was measured on
    pub target_node: NodeId,
    /// Signal that exceeded its threshold
    pub risk_type: RiskType,
    /// Measured level, [0, 1]
    pub risk_level: f64,
    /// Threshold at detection time
    pub threshold: f64,
    /// Target first, then strongly coupled dependents
    pub affected_nodes: Vec<NodeId>,
    /// Analytic cascade estimate for the target
    pub cascade_probability: f64,
    /// Named contributing factors
    pub risk_factors: BTreeMap<String, f64>,
    /// Detection confidence
    pub confidence: f64,
}

impl RiskDetection {
    /// Create detection affecting only the target
    #[must_use]
    pub fn new(target: impl Into<NodeId>, risk_type: RiskType, risk_level: f64, threshold: f64) -> Self {
        let target = target.into();
        Self {
            detection_id: DetectionId::new(),
            detected_at: Utc::now(),
            affected_nodes: vec![target.clone()],
            target_node: target,
            risk_type,
            risk_level: risk_level.clamp(0.0, 1.0),
            threshold,
            cascade_probability: 0.0,
            risk_factors: BTreeMap::new(),
            confidence: risk_type.confidence(),
        }
    }

    /// With additional affected nodes (target stays first)
    #[must_use]
    pub fn with_affected(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        for node in nodes {
            if !self.affected_nodes.contains(&node) {
                self.affected_nodes.push(node);
            }
        }
        self
    }

    /// With analytic cascade estimate
    #[inline]
    #[must_use]
    pub fn with_cascade_probability(mut self, p: f64) -> Self {
        self.cascade_probability = p.clamp(0.0, 1.0);
        self
    }

    /// With named risk factor
    #[inline]
    #[must_use]
    pub fn with_factor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.risk_factors.insert(name.into(), value);
        self
    }
}

/// Control action issued to the actuation collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Shift load to healthy peers
    LoadRedistribution,
    /// Route traffic around a node
    EmergencyRerouting,
    /// Bring redundant systems online
    RedundancyActivation,
    /// Move patients to facilities with spare capacity
    HospitalLoadBalancing,
    /// Switch to backup communications
    TelecomBackupSwitch,
    /// Isolate a failing grid segment
    PowerGridIsolation,
    /// Route water around a compromised plant
    WaterFlowRerouting,
    /// Open an emergency transport corridor
    TransportCorridorOpening,
    /// Activate backup supply
    BackupActivation,
    /// Drop non-critical load
    LoadShedding,
    /// Move crews and equipment
    ResourceReallocation,
    /// Raise sampling and alerting on a node
    EnhancedMonitoring,
}

/// Nominal effect of a successful action on each target
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionEffect {
    /// Health added
    pub health_gain: f64,
    /// Fraction of current load removed
    pub load_relief: f64,
    /// Redundancy levels added
    pub redundancy_gain: u8,
}

impl ActionType {
    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::LoadRedistribution => "load_redistribution",
            ActionType::EmergencyRerouting => "emergency_rerouting",
            ActionType::RedundancyActivation => "redundancy_activation",
            ActionType::HospitalLoadBalancing => "hospital_load_balancing",
            ActionType::TelecomBackupSwitch => "telecom_backup_switch",
            ActionType::PowerGridIsolation => "power_grid_isolation",
            ActionType::WaterFlowRerouting => "water_flow_rerouting",
            ActionType::TransportCorridorOpening => "transport_corridor_opening",
            ActionType::BackupActivation => "backup_activation",
            ActionType::LoadShedding => "load_shedding",
            ActionType::ResourceReallocation => "resource_reallocation",
            ActionType::EnhancedMonitoring => "enhanced_monitoring",
        }
    }

    /// Effect applied to the graph when the actuator acknowledges the action
    #[must_use]
    pub fn nominal_effect(&self) -> ActionEffect {
        let (health_gain, load_relief, redundancy_gain) = match self {
            ActionType::LoadRedistribution => (0.05, 0.25, 0),
            ActionType::EmergencyRerouting => (0.05, 0.20, 0),
            ActionType::RedundancyActivation => (0.20, 0.0, 1),
            ActionType::HospitalLoadBalancing => (0.05, 0.30, 0),
            ActionType::TelecomBackupSwitch => (0.30, 0.10, 0),
            ActionType::PowerGridIsolation => (0.25, 0.40, 0),
            ActionType::WaterFlowRerouting => (0.15, 0.25, 0),
            ActionType::TransportCorridorOpening => (0.10, 0.20, 0),
            ActionType::BackupActivation => (0.25, 0.10, 1),
            ActionType::LoadShedding => (0.05, 0.35, 0),
            ActionType::ResourceReallocation => (0.10, 0.15, 0),
            ActionType::EnhancedMonitoring => (0.0, 0.0, 0),
        };
        ActionEffect {
            health_gain,
            load_relief,
            redundancy_gain,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One action inside an intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAction {
    /// Action kind
    pub action_type: ActionType,
    /// Nodes acted on
    pub target_nodes: Vec<NodeId>,
    /// Execution order, 1 first
    pub priority: u8,
    /// Expected risk reduction, [0, 1]
    pub expected_impact: f64,
}

/// Proposed, not yet executed bundle of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationIntent {
    /// Unique id
    pub intent_id: IntentId,
    /// Creation time
    pub generated_at: DateTime<Utc>,
    /// Detection this intent answers
    pub source_detection: DetectionId,
    /// Actions ordered by priority
    pub actions: Vec<IntentAction>,
    /// Mean expected impact of the actions
    pub expected_risk_reduction: f64,
    /// 1 for high risk, 2 otherwise
    pub execution_priority: u8,
    /// Resource counts keyed by resource name
    pub resource_requirements: BTreeMap<String, u32>,
    /// Estimated chance the intent succeeds
    pub success_probability: f64,
}

/// Outcome of the agent deployment phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Deployment ids returned by the collaborator
    pub deployment_ids: Vec<String>,
    /// Whether the deployment was accepted
    pub accepted: bool,
    /// Record time
    pub recorded_at: DateTime<Utc>,
}

/// Result of one control action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    /// Acknowledged and applied
    Completed,
    /// Errored, rejected or timed out
    Failed,
}

/// Record of one control action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Action kind
    pub action_type: ActionType,
    /// Nodes acted on
    pub target_nodes: Vec<NodeId>,
    /// Outcome
    pub status: ControlStatus,
    /// Failure description
    pub error: Option<String>,
    /// Completion time
    pub executed_at: DateTime<Utc>,
}

/// Coarse loop status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// Risk detected, nothing issued yet
    AtRisk,
    /// Intent in flight
    Stabilizing,
    /// Effectiveness at or above the stable threshold
    Stable,
    /// Partially effective
    Recovering,
    /// Ineffective or aborted
    Failed,
}

impl LoopStatus {
    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::AtRisk => "at_risk",
            LoopStatus::Stabilizing => "stabilizing",
            LoopStatus::Stable => "stable",
            LoopStatus::Recovering => "recovering",
            LoopStatus::Failed => "failed",
        }
    }

    /// Check if the loop has finished
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopStatus::Stable | LoopStatus::Recovering | LoopStatus::Failed)
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured effect of a loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessMetrics {
    /// Pre level minus post level of the detected risk
    pub risk_reduction_delta: f64,
    /// Delta divided by pre level, [0, 1]
    pub normalized_risk_reduction: f64,
    /// Affected nodes with health above 0.8, per minute
    pub recovery_speed: f64,
    /// Recovery speed against the reference rate, [0, 1]
    pub normalized_recovery_speed: f64,
    /// One minus post-action simulated cascade probability
    pub cascade_containment_success: f64,
    /// Weighted sum of the normalized components
    pub overall_effectiveness: f64,
    /// Cascade probability simulated before acting
    pub baseline_cascade_probability: f64,
    /// Cascade probability simulated after acting
    pub post_cascade_probability: f64,
    /// Seconds between loop start and evaluation
    pub measurement_window_secs: f64,
}

/// Full record of a stabilization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationLoop {
    /// Unique id
    pub loop_id: LoopId,
    /// Spawn time
    pub start_time: DateTime<Utc>,
    /// Terminal transition time
    pub end_time: Option<DateTime<Utc>>,
    /// Current phase
    pub phase: LoopPhase,
    /// Detection that spawned the loop
    pub detection: RiskDetection,
    /// Generated intent
    pub intent: Option<StabilizationIntent>,
    /// Agent deployment outcome
    pub deployment: Option<DeploymentRecord>,
    /// Per-action control outcomes
    pub controls: Vec<ControlRecord>,
    /// Evaluation result
    pub effectiveness: Option<EffectivenessMetrics>,
    /// Learning store changes caused by this loop
    pub learning_updates: Vec<LearningUpdate>,
    /// Why the loop failed, if it did
    pub failure_reason: Option<String>,
}

impl StabilizationLoop {
    /// Create a loop record for a fresh detection
    #[must_use]
    pub fn new(loop_id: LoopId, detection: RiskDetection) -> Self {
        Self {
            loop_id,
            start_time: Utc::now(),
            end_time: None,
            phase: LoopPhase::RiskDetected,
            detection,
            intent: None,
            deployment: None,
            controls: Vec::new(),
            effectiveness: None,
            learning_updates: Vec::new(),
            failure_reason: None,
        }
    }

    /// Coarse status derived from the phase
    #[inline]
    #[must_use]
    pub fn status(&self) -> LoopStatus {
        self.phase.status()
    }

    /// Node this loop stabilizes
    #[inline]
    #[must_use]
    pub fn target_node(&self) -> &NodeId {
        &self.detection.target_node
    }

    /// Wall-clock duration, if finished
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time.map(|end| {
            #[allow(clippy::cast_precision_loss)]
            let millis = (end - self.start_time).num_milliseconds() as f64;
            millis / 1000.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_keeps_target_first() {
        let detection = RiskDetection::new("a", RiskType::FailureRate, 1.3, 0.3)
            .with_affected(vec![NodeId::from("b"), NodeId::from("a"), NodeId::from("c")]);
        let ids: Vec<&str> = detection.affected_nodes.iter().map(NodeId::as_str).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(detection.risk_level, 1.0);
        assert_eq!(detection.confidence, 0.85);
    }

    #[test]
    fn risk_type_modes() {
        assert_eq!(
            RiskType::InfrastructureOverload.failure_mode(),
            FailureMode::Overload
        );
        assert_eq!(RiskType::CascadeProbability.confidence(), 0.75);
    }

    #[test]
    fn action_effects_are_bounded() {
        for action in [
            ActionType::LoadRedistribution,
            ActionType::PowerGridIsolation,
            ActionType::BackupActivation,
            ActionType::EnhancedMonitoring,
        ] {
            let effect = action.nominal_effect();
            assert!((0.0..=1.0).contains(&effect.health_gain));
            assert!((0.0..=1.0).contains(&effect.load_relief));
        }
        assert_eq!(ActionType::BackupActivation.nominal_effect().redundancy_gain, 1);
    }

    #[test]
    fn loop_status_terminal() {
        assert!(LoopStatus::Recovering.is_terminal());
        assert!(!LoopStatus::Stabilizing.is_terminal());
        assert_eq!(
            serde_json::to_string(&LoopStatus::AtRisk).unwrap(),
            "\"at_risk\""
        );
    }
}
