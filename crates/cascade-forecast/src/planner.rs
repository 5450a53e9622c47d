//! Pre-stabilization planning
//!
//! Turns a high-probability cascade prediction into ranked mitigation
//! strategies. Each strategy's expected benefit comes from a what-if
//! simulation on a modified snapshot copy, run with the same base seed as
//! a fresh baseline so both runs see the same random draws. The live graph
//! is never modified by planning.

use crate::analyzer::CriticalNodeAnalyzer;
use crate::config::PlannerConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::graph::GraphSnapshot;
use crate::simulator::{CascadePrediction, CascadeSimulator};
use crate::types::{NodeId, PredictionId, StrategyId, MAX_REDUNDANCY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const COST_PER_TARGET: f64 = 10.0;
const COST_PER_BACKUP: f64 = 5.0;
const COST_PER_EDGE: f64 = 6.0;
const CRITICAL_NODE_MINUTES: u32 = 30;
const STRENGTHENING_MINUTES: u32 = 45;

/// Strategy family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Relieve and back up the most critical affected nodes
    CriticalNodeStabilization,
    /// Weaken strong propagation paths inside the affected set
    DependencyStrengthening,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::CriticalNodeStabilization => f.write_str("critical_node_stabilization"),
            StrategyKind::DependencyStrengthening => f.write_str("dependency_strengthening"),
        }
    }
}

/// Mitigation step proposed by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedActionType {
    /// Shed a fraction of current load
    LoadReduction,
    /// Bring a backup system online
    BackupActivation,
    /// Harden a dependency so failures propagate less
    StrengthenDependency,
}

/// One proposed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Action kind
    pub action_type: PlannedActionType,
    /// Nodes acted on (edge endpoints for strengthening)
    pub targets: Vec<NodeId>,
    /// Load fraction, redundancy increment or weight factor
    pub magnitude: f64,
}

/// Ranked mitigation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreStabilizationStrategy {
    /// Unique id
    pub strategy_id: StrategyId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Prediction this strategy answers
    pub source_prediction: PredictionId,
    /// Strategy family
    pub kind: StrategyKind,
    /// Nodes acted on
    pub target_nodes: Vec<NodeId>,
    /// Edges acted on, as (source, target)
    pub target_edges: Vec<(NodeId, NodeId)>,
    /// Proposed actions
    pub actions: Vec<PlannedAction>,
    /// Baseline minus what-if cascade probability, never negative
    pub expected_cascade_reduction: f64,
    /// Cost units
    pub implementation_cost: f64,
    /// Time to implement
    pub implementation_time_minutes: u32,
    /// `expected_cascade_reduction / (cost * hours)`
    pub priority_score: f64,
}

/// Pre-stabilization planner
#[derive(Debug, Clone)]
pub struct PreStabilizationPlanner {
    config: PlannerConfig,
    simulator: CascadeSimulator,
    analyzer: CriticalNodeAnalyzer,
}

impl PreStabilizationPlanner {
    /// Create planner using `simulator` for what-if runs
    #[must_use]
    pub fn new(config: PlannerConfig, simulator: CascadeSimulator) -> Self {
        Self {
            config,
            simulator,
            analyzer: CriticalNodeAnalyzer::new(),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan strategies for a prediction
    ///
    /// Returns an empty list unless the prediction's cascade probability is
    /// above the trigger. `risk_reduction_weight` is the current learning
    /// weight for risk reduction; it blends cascade membership into the
    /// target ranking.
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the prediction's start node is gone
    /// - `ForecastError::InsufficientTrials` if what-if trials are below the minimum
    #[tracing::instrument(skip_all, fields(prediction = %prediction.prediction_id))]
    pub fn plan(
        &self,
        snapshot: &GraphSnapshot,
        prediction: &CascadePrediction,
        risk_reduction_weight: f64,
    ) -> ForecastResult<Vec<PreStabilizationStrategy>> {
        if prediction.cascade_probability <= self.config.trigger_probability {
            return Ok(Vec::new());
        }
        let start = &prediction.initial_failure_node;
        if snapshot.index_of(start).is_none() {
            return Err(ForecastError::NodeNotFound(start.clone()));
        }

        let seed = self.simulator.config().seed.unwrap_or_else(rand::random);
        let trials = Some(self.config.what_if_trials);
        let baseline = self.simulator.simulate_seeded(
            snapshot,
            start,
            prediction.failure_mode,
            trials,
            seed,
        )?;
        let what_if = |copy: &GraphSnapshot| -> ForecastResult<f64> {
            let run =
                self.simulator
                    .simulate_seeded(copy, start, prediction.failure_mode, trials, seed)?;
            Ok((baseline.cascade_probability - run.cascade_probability).max(0.0))
        };

        let mut strategies = Vec::new();

        let targets = self.select_targets(snapshot, prediction, risk_reduction_weight);
        if !targets.is_empty() {
            let backups: Vec<NodeId> = targets
                .iter()
                .take(self.config.backup_targets)
                .cloned()
                .collect();

            let mut copy = snapshot.clone();
            for id in &targets {
                if let Some(node) = copy.node_mut(id) {
                    node.health_score = (node.health_score + self.config.health_boost).min(1.0);
                }
            }
            for id in &backups {
                if let Some(node) = copy.node_mut(id) {
                    node.redundancy_level = (node.redundancy_level + 1).min(MAX_REDUNDANCY);
                }
            }
            let reduction = what_if(&copy)?;

            #[allow(clippy::cast_precision_loss)]
            let cost = COST_PER_TARGET * targets.len() as f64 + COST_PER_BACKUP * backups.len() as f64;
            strategies.push(self.strategy(
                prediction,
                StrategyKind::CriticalNodeStabilization,
                targets.clone(),
                Vec::new(),
                vec![
                    PlannedAction {
                        action_type: PlannedActionType::LoadReduction,
                        targets: targets.clone(),
                        magnitude: self.config.load_reduction_fraction,
                    },
                    PlannedAction {
                        action_type: PlannedActionType::BackupActivation,
                        targets: backups,
                        magnitude: 1.0,
                    },
                ],
                reduction,
                cost,
                CRITICAL_NODE_MINUTES,
            ));
        }

        let edges = self.strengthening_edges(snapshot, prediction);
        if !edges.is_empty() {
            let mut copy = snapshot.clone();
            for (s, t) in &edges {
                copy.scale_edge_weight(s, t, self.config.strengthening_factor);
            }
            let reduction = what_if(&copy)?;

            let mut endpoints: Vec<NodeId> = edges
                .iter()
                .flat_map(|(s, t)| [s.clone(), t.clone()])
                .collect();
            endpoints.sort();
            endpoints.dedup();

            #[allow(clippy::cast_precision_loss)]
            let cost = COST_PER_EDGE * edges.len() as f64;
            strategies.push(self.strategy(
                prediction,
                StrategyKind::DependencyStrengthening,
                endpoints.clone(),
                edges,
                vec![PlannedAction {
                    action_type: PlannedActionType::StrengthenDependency,
                    targets: endpoints,
                    magnitude: self.config.strengthening_factor,
                }],
                reduction,
                cost,
                STRENGTHENING_MINUTES,
            ));
        }

        strategies.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        tracing::info!(
            strategies = strategies.len(),
            baseline = baseline.cascade_probability,
            "pre-stabilization plan ready"
        );
        Ok(strategies)
    }

    /// Top-K affected nodes by `priority + weight * membership`, ties by id
    fn select_targets(
        &self,
        snapshot: &GraphSnapshot,
        prediction: &CascadePrediction,
        risk_reduction_weight: f64,
    ) -> Vec<NodeId> {
        let mut scored: Vec<(f64, NodeId)> = prediction
            .affected_nodes
            .iter()
            .filter_map(|id| {
                let idx = snapshot.index_of(id)?;
                let analysis = self.analyzer.analyze_node(snapshot, idx);
                let key = analysis.stabilization_priority
                    + risk_reduction_weight * prediction.membership_of(id);
                Some((key, id.clone()))
            })
            .collect();
        scored.sort_by(|(ka, ia), (kb, ib)| kb.total_cmp(ka).then_with(|| ia.cmp(ib)));
        scored
            .into_iter()
            .take(self.config.top_k)
            .map(|(_, id)| id)
            .collect()
    }

    /// Edges internal to the affected set above the weight threshold
    fn strengthening_edges(
        &self,
        snapshot: &GraphSnapshot,
        prediction: &CascadePrediction,
    ) -> Vec<(NodeId, NodeId)> {
        let affected: HashSet<&NodeId> = prediction.affected_nodes.iter().collect();
        snapshot
            .edges()
            .filter(|e| {
                affected.contains(&e.source_node)
                    && affected.contains(&e.target_node)
                    && e.failure_propagation_weight > self.config.strengthening_weight_threshold
            })
            .map(|e| (e.source_node.clone(), e.target_node.clone()))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn strategy(
        &self,
        prediction: &CascadePrediction,
        kind: StrategyKind,
        target_nodes: Vec<NodeId>,
        target_edges: Vec<(NodeId, NodeId)>,
        actions: Vec<PlannedAction>,
        expected_cascade_reduction: f64,
        implementation_cost: f64,
        implementation_time_minutes: u32,
    ) -> PreStabilizationStrategy {
        let hours = f64::from(implementation_time_minutes) / 60.0;
        let denominator = implementation_cost * hours;
        let priority_score = if denominator > 0.0 {
            expected_cascade_reduction / denominator
        } else {
            0.0
        };

        tracing::debug!(%kind, expected_cascade_reduction, priority_score, "strategy evaluated");
        PreStabilizationStrategy {
            strategy_id: StrategyId::new(),
            created_at: Utc::now(),
            source_prediction: prediction.prediction_id,
            kind,
            target_nodes,
            target_edges,
            actions,
            expected_cascade_reduction,
            implementation_cost,
            implementation_time_minutes,
            priority_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::graph::DependencyGraph;
    use crate::types::{DependencyEdge, FailureMode, InfrastructureNode, NodeCategory};

    fn fragile_chain() -> DependencyGraph {
        let graph = DependencyGraph::new();
        for id in ["a", "b", "c", "d"] {
            graph
                .add_node(InfrastructureNode::new(id, NodeCategory::PowerGrid).with_health(0.1))
                .unwrap();
        }
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "d")] {
            graph
                .add_edge(DependencyEdge::new(s, t, "power_supply", 0.9))
                .unwrap();
        }
        graph
    }

    fn planner() -> PreStabilizationPlanner {
        let simulator = CascadeSimulator::new(SimulationConfig::default().with_seed(3));
        PreStabilizationPlanner::new(PlannerConfig::default().with_top_k(2), simulator)
    }

    #[test]
    fn low_probability_yields_nothing() {
        let graph = fragile_chain();
        let planner = planner();
        let mut prediction = planner
            .simulator
            .simulate(&graph, &"a".into(), FailureMode::Overload, None)
            .unwrap();
        prediction.cascade_probability = 0.5;

        let plan = planner.plan(&graph.snapshot(), &prediction, 0.4).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_produces_both_kinds_and_keeps_store_intact() {
        let graph = fragile_chain();
        let planner = planner();
        let snapshot = graph.snapshot();
        let prediction = planner
            .simulator
            .simulate_snapshot(&snapshot, &"a".into(), FailureMode::Overload, None)
            .unwrap();
        assert!(prediction.cascade_probability > 0.7);

        let plan = planner.plan(&snapshot, &prediction, 0.4).unwrap();
        assert_eq!(plan.len(), 2);
        for pair in plan.windows(2) {
            assert!(pair[0].priority_score >= pair[1].priority_score);
        }

        let critical = plan
            .iter()
            .find(|s| s.kind == StrategyKind::CriticalNodeStabilization)
            .unwrap();
        assert_eq!(critical.target_nodes.len(), 2);
        assert_eq!(critical.implementation_cost, 2.0 * 10.0 + 2.0 * 5.0);
        assert_eq!(critical.implementation_time_minutes, 30);
        assert!(critical.expected_cascade_reduction >= 0.0);

        let strengthening = plan
            .iter()
            .find(|s| s.kind == StrategyKind::DependencyStrengthening)
            .unwrap();
        assert_eq!(strengthening.target_edges.len(), 3);
        assert_eq!(strengthening.implementation_cost, 18.0);
        assert!(strengthening.expected_cascade_reduction > 0.0);

        let live = graph.edge(&"a".into(), &"b".into()).unwrap();
        assert!((live.failure_propagation_weight - 0.9).abs() < 1e-12);
    }
}
