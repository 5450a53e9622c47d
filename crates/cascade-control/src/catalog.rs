//! Action catalog and intent generation
//!
//! Maps node categories and risk types to control actions. An intent for a
//! detection combines the target category's actions, the risk type's
//! actions and whatever the critical-node analyzer recommends.

use crate::error::{ControlError, ControlResult};
use crate::types::{
    ActionType, IntentAction, IntentId, RiskDetection, RiskType, StabilizationIntent,
};
use cascade_forecast::{
    CriticalNodeAnalysis, ForecastError, GraphSnapshot, NodeCategory, NodeId, RecommendedAction,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

/// Action offered for a node category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAction {
    /// Action kind
    pub action_type: ActionType,
    /// Expected risk reduction
    pub expected_impact: f64,
    /// Resources consumed
    pub resources: BTreeMap<String, u32>,
}

impl CategoryAction {
    /// Create action without resource needs
    #[must_use]
    pub fn new(action_type: ActionType, expected_impact: f64) -> Self {
        Self {
            action_type,
            expected_impact: expected_impact.clamp(0.0, 1.0),
            resources: BTreeMap::new(),
        }
    }

    /// With resource requirement
    #[inline]
    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, count: u32) -> Self {
        self.resources.insert(name.into(), count);
        self
    }
}

/// Action attached to a risk type
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAction {
    /// Action kind
    pub action_type: ActionType,
    /// Leading affected nodes targeted
    pub target_limit: usize,
    /// Execution priority
    pub priority: u8,
    /// Expected risk reduction
    pub expected_impact: f64,
}

/// Lookup of control actions
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    by_category: HashMap<NodeCategory, Vec<CategoryAction>>,
    by_risk: HashMap<RiskType, Vec<RiskAction>>,
}

impl ActionCatalog {
    /// Create empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog covering every node category and risk type
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_category(
                NodeCategory::PowerGrid,
                vec![
                    CategoryAction::new(ActionType::LoadRedistribution, 0.25)
                        .with_resource("engineers", 2)
                        .with_resource("equipment", 1),
                    CategoryAction::new(ActionType::PowerGridIsolation, 0.45)
                        .with_resource("operators", 1)
                        .with_resource("automation", 1),
                ],
            )
            .with_category(
                NodeCategory::Hospital,
                vec![CategoryAction::new(ActionType::HospitalLoadBalancing, 0.30)
                    .with_resource("ambulances", 5)
                    .with_resource("medical_staff", 10)],
            )
            .with_category(
                NodeCategory::TelecomTower,
                vec![CategoryAction::new(ActionType::TelecomBackupSwitch, 0.40)
                    .with_resource("technicians", 2)
                    .with_resource("backup_systems", 1)],
            )
            .with_category(
                NodeCategory::WaterSystem,
                vec![CategoryAction::new(ActionType::WaterFlowRerouting, 0.25)
                    .with_resource("operators", 3)
                    .with_resource("valves", 5)],
            )
            .with_category(
                NodeCategory::TransportBridge,
                vec![CategoryAction::new(ActionType::TransportCorridorOpening, 0.20)
                    .with_resource("traffic_control", 4)
                    .with_resource("signage", 10)],
            )
            .with_category(
                NodeCategory::CommunicationCenter,
                vec![
                    CategoryAction::new(ActionType::EmergencyRerouting, 0.20)
                        .with_resource("operators", 2),
                    CategoryAction::new(ActionType::RedundancyActivation, 0.35)
                        .with_resource("backup_systems", 1),
                ],
            )
            .with_category(
                NodeCategory::School,
                vec![CategoryAction::new(ActionType::EmergencyRerouting, 0.15)
                    .with_resource("staff", 4)],
            )
            .with_risk(
                RiskType::CascadeProbability,
                vec![
                    risk_action(ActionType::LoadRedistribution, 3, 1, 0.6),
                    risk_action(ActionType::BackupActivation, 2, 2, 0.8),
                ],
            )
            .with_risk(
                RiskType::InfrastructureOverload,
                vec![
                    risk_action(ActionType::LoadShedding, 5, 1, 0.7),
                    risk_action(ActionType::ResourceReallocation, 3, 2, 0.5),
                ],
            )
            .with_risk(
                RiskType::FailureRate,
                vec![risk_action(ActionType::RedundancyActivation, 1, 1, 0.5)],
            )
    }

    /// With actions for a category, replacing any existing entry
    #[must_use]
    pub fn with_category(mut self, category: NodeCategory, actions: Vec<CategoryAction>) -> Self {
        self.by_category.insert(category, actions);
        self
    }

    /// With actions for a risk type, replacing any existing entry
    #[must_use]
    pub fn with_risk(mut self, risk_type: RiskType, actions: Vec<RiskAction>) -> Self {
        self.by_risk.insert(risk_type, actions);
        self
    }

    /// Actions registered for a category
    #[must_use]
    pub fn category_actions(&self, category: NodeCategory) -> Option<&[CategoryAction]> {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .filter(|actions| !actions.is_empty())
    }

    /// Build an intent for a detection
    ///
    /// Targets not present in `snapshot` are dropped; every action keeps at
    /// least the detection's target node.
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the target node is missing
    /// - `ControlError::NoApplicableAction` if the target's category has no actions
    pub fn build_intent(
        &self,
        detection: &RiskDetection,
        snapshot: &GraphSnapshot,
        analysis: Option<&CriticalNodeAnalysis>,
    ) -> ControlResult<StabilizationIntent> {
        let target = snapshot
            .node(&detection.target_node)
            .ok_or_else(|| ForecastError::NodeNotFound(detection.target_node.clone()))?;
        let category_actions =
            self.category_actions(target.category)
                .ok_or_else(|| ControlError::NoApplicableAction {
                    node: target.node_id.clone(),
                    category: target.category,
                })?;

        let affected: Vec<NodeId> = detection
            .affected_nodes
            .iter()
            .filter(|id| snapshot.index_of(id).is_some())
            .cloned()
            .collect();

        let mut actions: Vec<IntentAction> = Vec::new();
        let mut resources: BTreeMap<String, u32> = BTreeMap::new();
        for template in category_actions {
            let action = IntentAction {
                action_type: template.action_type,
                target_nodes: vec![target.node_id.clone()],
                priority: 1,
                expected_impact: template.expected_impact,
            };
            if push_unique(&mut actions, action) {
                for (name, count) in &template.resources {
                    *resources.entry(name.clone()).or_insert(0) += count;
                }
            }
        }

        for template in self.by_risk.get(&detection.risk_type).into_iter().flatten() {
            let targets: Vec<NodeId> = affected.iter().take(template.target_limit).cloned().collect();
            push_unique(
                &mut actions,
                IntentAction {
                    action_type: template.action_type,
                    target_nodes: targets,
                    priority: template.priority,
                    expected_impact: template.expected_impact,
                },
            );
        }

        if let Some(analysis) = analysis {
            for recommended in &analysis.recommended_actions {
                let (action_type, impact) = recommended_action(*recommended);
                push_unique(
                    &mut actions,
                    IntentAction {
                        action_type,
                        target_nodes: vec![target.node_id.clone()],
                        priority: 3,
                        expected_impact: impact,
                    },
                );
            }
        }

        actions.sort_by_key(|a| a.priority);

        let high_risk = detection.risk_level > 0.8;
        resources.insert(
            "infrastructure_control".to_string(),
            u32::try_from(actions.len()).unwrap_or(u32::MAX),
        );
        resources.insert("monitoring_agents".to_string(), 2);
        if high_risk {
            resources.insert("repair_teams".to_string(), 1);
        }

        #[allow(clippy::cast_precision_loss)]
        let expected_risk_reduction =
            actions.iter().map(|a| a.expected_impact).sum::<f64>() / actions.len().max(1) as f64;

        Ok(StabilizationIntent {
            intent_id: IntentId::new(),
            generated_at: Utc::now(),
            source_detection: detection.detection_id,
            actions,
            expected_risk_reduction,
            execution_priority: if high_risk { 1 } else { 2 },
            resource_requirements: resources,
            success_probability: (0.7 + (1.0 - detection.risk_level) * 0.25).min(0.95),
        })
    }
}

/// Push unless empty or an action of the same type is already present
fn push_unique(actions: &mut Vec<IntentAction>, action: IntentAction) -> bool {
    if action.target_nodes.is_empty() || actions.iter().any(|a| a.action_type == action.action_type) {
        return false;
    }
    actions.push(action);
    true
}

fn risk_action(action_type: ActionType, target_limit: usize, priority: u8, impact: f64) -> RiskAction {
    RiskAction {
        action_type,
        target_limit,
        priority,
        expected_impact: impact,
    }
}

fn recommended_action(recommended: RecommendedAction) -> (ActionType, f64) {
    match recommended {
        RecommendedAction::IncreaseRedundancy => (ActionType::RedundancyActivation, 0.35),
        RecommendedAction::EnhanceMonitoring => (ActionType::EnhancedMonitoring, 0.1),
        RecommendedAction::PreStabilization => (ActionType::LoadRedistribution, 0.25),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_forecast::{CriticalNodeAnalyzer, DependencyEdge, DependencyGraph, InfrastructureNode};

    fn graph() -> DependencyGraph {
        let graph = DependencyGraph::new();
        graph
            .add_node(InfrastructureNode::new("plant", NodeCategory::PowerGrid).with_health(0.2))
            .unwrap();
        graph
            .add_node(InfrastructureNode::new("clinic", NodeCategory::Hospital))
            .unwrap();
        graph
            .add_edge(DependencyEdge::new("plant", "clinic", "power_supply", 0.9))
            .unwrap();
        graph
    }

    #[test]
    fn intent_combines_category_and_risk_actions() {
        let graph = graph();
        let snapshot = graph.snapshot();
        let detection = RiskDetection::new("plant", RiskType::CascadeProbability, 0.9, 0.7)
            .with_affected(vec![NodeId::from("clinic"), NodeId::from("ghost")]);

        let intent = ActionCatalog::standard()
            .build_intent(&detection, &snapshot, None)
            .unwrap();

        let types: Vec<ActionType> = intent.actions.iter().map(|a| a.action_type).collect();
        assert_eq!(
            types,
            vec![
                ActionType::LoadRedistribution,
                ActionType::PowerGridIsolation,
                ActionType::BackupActivation,
            ]
        );
        let backup = &intent.actions[2];
        assert_eq!(backup.target_nodes, vec![NodeId::from("plant"), NodeId::from("clinic")]);
        assert_eq!(intent.execution_priority, 1);
        assert_eq!(intent.resource_requirements["engineers"], 2);
        assert_eq!(intent.resource_requirements["infrastructure_control"], 3);
        assert_eq!(intent.resource_requirements["repair_teams"], 1);
        assert!((intent.success_probability - 0.725).abs() < 1e-12);
        assert_eq!(intent.source_detection, detection.detection_id);
    }

    #[test]
    fn analyzer_recommendations_are_appended() {
        let graph = graph();
        let snapshot = graph.snapshot();
        let analysis = CriticalNodeAnalyzer::new().analyze_node(&snapshot, 0);
        let detection = RiskDetection::new("plant", RiskType::FailureRate, 0.8, 0.3);

        let intent = ActionCatalog::standard()
            .build_intent(&detection, &snapshot, Some(&analysis))
            .unwrap();

        assert!(intent
            .actions
            .iter()
            .any(|a| a.action_type == ActionType::RedundancyActivation));
        assert!(!intent.resource_requirements.contains_key("repair_teams"));
        for pair in intent.actions.windows(2) {
            assert!(pair[0].priority <= pair[1].priority);
        }
    }

    #[test]
    fn category_miss_is_rejected() {
        let graph = graph();
        let detection = RiskDetection::new("clinic", RiskType::FailureRate, 0.5, 0.3);
        let err = ActionCatalog::new()
            .build_intent(&detection, &graph.snapshot(), None)
            .unwrap_err();
        assert!(matches!(err, ControlError::NoApplicableAction { .. }));

        let missing = RiskDetection::new("ghost", RiskType::FailureRate, 0.5, 0.3);
        let err = ActionCatalog::standard()
            .build_intent(&missing, &graph.snapshot(), None)
            .unwrap_err();
        assert!(matches!(err, ControlError::Forecast(e) if e.is_not_found()));
    }
}
