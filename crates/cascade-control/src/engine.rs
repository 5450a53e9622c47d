//! Engine facade
//!
//! Wires the dependency graph, forecast components, risk monitor, loop
//! manager and learning store together and exposes the read-only query
//! surface plus the periodic monitor runner.

use crate::catalog::ActionCatalog;
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::error::ControlResult;
use crate::learning::{AdaptiveLearningStore, LearningWeights, RiskThresholds};
use crate::loop_manager::{LoopHandle, LoopManager};
use crate::monitor::{real_time_probabilities, RealTimeRisk, RiskMonitor};
use crate::persistence::{EngineSnapshot, SNAPSHOT_VERSION};
use crate::phase::LoopPhase;
use crate::types::{LoopStatus, StabilizationLoop};
use cascade_forecast::{
    CascadePrediction, CascadeSimulator, CriticalNodeAnalysis, CriticalNodeAnalyzer,
    DependencyGraph, FailureMode, ForecastResult, NodeId, PreStabilizationPlanner,
    PreStabilizationStrategy,
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Priority above which a node counts as critical in system metrics
const CRITICAL_PRIORITY: f64 = 0.7;

/// Outcome of one monitor tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Detections raised
    pub detections: usize,
    /// Loops spawned
    pub spawned: Vec<LoopHandle>,
    /// Detections dropped because the node already had a loop
    pub rejected: usize,
}

/// Aggregate view of completed loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEffectiveness {
    /// Completed loops retained
    pub total_loops: usize,
    /// Completed loops that ended `Stable`
    pub successful_loops: usize,
    /// Successful over total, zero when empty
    pub success_rate: f64,
    /// Mean overall effectiveness of evaluated loops
    pub average_effectiveness: f64,
    /// Mean loop duration in seconds
    pub average_duration_secs: f64,
    /// Active loops per phase
    pub active_phases: BTreeMap<String, usize>,
    /// Current thresholds
    pub risk_thresholds: RiskThresholds,
    /// Current weights
    pub learning_weights: LearningWeights,
}

/// Forecast-side health summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Nodes in the graph
    pub total_nodes: usize,
    /// Edges in the graph
    pub total_dependencies: usize,
    /// Predictions retained
    pub active_predictions: usize,
    /// Nodes with stabilization priority above 0.7
    pub critical_nodes: usize,
    /// Strategies retained
    pub available_strategies: usize,
    /// Mean node health
    pub average_health: f64,
    /// Mean load over capacity
    pub average_load: f64,
    /// Nodes with health below 0.6 or load above 90 % of capacity
    pub high_risk_nodes: usize,
    /// Loops currently running
    pub active_loops: usize,
}

/// Cascade forecast and closed-loop stabilization engine
pub struct CascadeEngine {
    config: EngineConfig,
    graph: Arc<DependencyGraph>,
    learning: Arc<AdaptiveLearningStore>,
    simulator: CascadeSimulator,
    analyzer: CriticalNodeAnalyzer,
    planner: PreStabilizationPlanner,
    monitor: RiskMonitor,
    loops: LoopManager,
    ranking: RwLock<Option<(u64, Vec<CriticalNodeAnalysis>)>>,
    predictions: RwLock<VecDeque<CascadePrediction>>,
    strategies: RwLock<Vec<PreStabilizationStrategy>>,
}

impl fmt::Debug for CascadeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeEngine")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("loops", &self.loops)
            .finish_non_exhaustive()
    }
}

impl CascadeEngine {
    /// Create engine with a fresh learning store
    #[must_use]
    pub fn new(graph: DependencyGraph, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self::with_learning(
            Arc::new(graph),
            Arc::new(AdaptiveLearningStore::new()),
            collaborators,
            config,
        )
    }

    /// Create engine around existing shared state
    #[must_use]
    pub fn with_learning(
        graph: Arc<DependencyGraph>,
        learning: Arc<AdaptiveLearningStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        let simulator = CascadeSimulator::new(config.forecast.simulation.clone());
        let planner = PreStabilizationPlanner::new(config.forecast.planner.clone(), simulator.clone());
        let monitor = RiskMonitor::new(
            Arc::clone(&collaborators.telemetry),
            Arc::clone(&graph),
            Arc::clone(&learning),
            config.monitor.clone(),
        );
        let loops = LoopManager::new(
            Arc::clone(&graph),
            Arc::clone(&learning),
            collaborators,
            simulator.clone(),
            ActionCatalog::standard(),
            config.control.clone(),
        );

        Self {
            config,
            graph,
            learning,
            simulator,
            analyzer: CriticalNodeAnalyzer::new(),
            planner,
            monitor,
            loops,
            ranking: RwLock::new(None),
            predictions: RwLock::new(VecDeque::new()),
            strategies: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild an engine from a saved snapshot
    ///
    /// # Errors
    /// - `ControlError::Forecast` if the saved topology is invalid
    pub fn restore(
        snapshot: EngineSnapshot,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> ControlResult<Self> {
        let graph = DependencyGraph::from_topology(&snapshot.topology)?;
        let learning = AdaptiveLearningStore::from_snapshot(snapshot.learning);
        let engine = Self::with_learning(Arc::new(graph), Arc::new(learning), collaborators, config);

        engine.loops.restore_completed(snapshot.completed_loops);
        {
            let mut predictions = engine.predictions.write();
            let skip = snapshot
                .predictions
                .len()
                .saturating_sub(engine.config.prediction_history);
            predictions.extend(snapshot.predictions.into_iter().skip(skip));
        }
        tracing::info!(
            nodes = engine.graph.node_count(),
            completed = engine.loops.completed_loops(usize::MAX).len(),
            "Engine restored from snapshot"
        );
        Ok(engine)
    }

    /// Capture persistable state
    #[must_use]
    pub fn snapshot(&self, name: &str) -> EngineSnapshot {
        let mut completed = self.loops.completed_loops(usize::MAX);
        completed.reverse();
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            topology: self.graph.to_topology(name),
            completed_loops: completed,
            predictions: self.predictions.read().iter().cloned().collect(),
            learning: self.learning.snapshot(),
        }
    }

    /// Shared dependency graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Shared learning store
    #[inline]
    #[must_use]
    pub fn learning(&self) -> &Arc<AdaptiveLearningStore> {
        &self.learning
    }

    /// Loop manager
    #[inline]
    #[must_use]
    pub fn loops(&self) -> &LoopManager {
        &self.loops
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Top nodes by stabilization priority
    ///
    /// The full ranking is cached until the graph changes.
    #[must_use]
    pub fn critical_nodes(&self, limit: usize) -> Vec<CriticalNodeAnalysis> {
        let revision = self.graph.revision();
        if let Some((cached, ranking)) = self.ranking.read().as_ref() {
            if *cached == revision {
                return ranking.iter().take(limit).cloned().collect();
            }
        }

        let snapshot = self.graph.snapshot();
        let ranking = self.analyzer.rank(&snapshot, usize::MAX);
        let result = ranking.iter().take(limit).cloned().collect();
        *self.ranking.write() = Some((snapshot.revision(), ranking));
        result
    }

    /// Simulate a failure and plan pre-stabilization if it is likely to cascade
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if `node` is not in the graph
    /// - `ForecastError::InsufficientTrials` below the configured minimum
    pub fn predict_cascade(
        &self,
        node: &NodeId,
        mode: FailureMode,
        trials: Option<usize>,
    ) -> ForecastResult<CascadePrediction> {
        let snapshot = self.graph.snapshot();
        let prediction = self.simulator.simulate_snapshot(&snapshot, node, mode, trials)?;

        {
            let mut predictions = self.predictions.write();
            predictions.push_back(prediction.clone());
            while predictions.len() > self.config.prediction_history {
                predictions.pop_front();
            }
        }

        let weight = self.learning.weights().risk_reduction;
        let planned = self.planner.plan(&snapshot, &prediction, weight)?;
        if !planned.is_empty() {
            tracing::info!(
                node = %node,
                probability = prediction.cascade_probability,
                strategies = planned.len(),
                "Pre-stabilization planned"
            );
            let mut strategies = self.strategies.write();
            strategies.extend(planned);
            strategies.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
            strategies.truncate(self.planner.config().max_strategies);
        }

        Ok(prediction)
    }

    /// Retained strategies, best first
    #[must_use]
    pub fn pre_stabilization_strategies(&self, limit: usize) -> Vec<PreStabilizationStrategy> {
        self.strategies.read().iter().take(limit).cloned().collect()
    }

    /// Retained predictions, newest first
    #[must_use]
    pub fn predictions(&self, limit: usize) -> Vec<CascadePrediction> {
        self.predictions
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Running loops, oldest first
    #[must_use]
    pub fn active_loops(&self) -> Vec<StabilizationLoop> {
        self.loops.active_loops()
    }

    /// Finished loops, newest first
    #[must_use]
    pub fn completed_loops(&self, limit: usize) -> Vec<StabilizationLoop> {
        self.loops.completed_loops(limit)
    }

    /// Aggregate effectiveness of completed loops
    #[must_use]
    pub fn system_effectiveness(&self) -> SystemEffectiveness {
        let completed = self.loops.completed_loops(usize::MAX);
        let successful = completed
            .iter()
            .filter(|l| l.status() == LoopStatus::Stable)
            .count();
        let scores: Vec<f64> = completed
            .iter()
            .filter_map(|l| l.effectiveness.as_ref().map(|e| e.overall_effectiveness))
            .collect();
        let durations: Vec<f64> = completed.iter().filter_map(StabilizationLoop::duration_secs).collect();

        let mut active_phases: BTreeMap<String, usize> = LoopPhase::ALL
            .iter()
            .filter(|p| !p.is_terminal())
            .map(|p| (p.as_str().to_string(), 0))
            .collect();
        for active in self.loops.active_loops() {
            *active_phases.entry(active.phase.as_str().to_string()).or_insert(0) += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if completed.is_empty() {
            0.0
        } else {
            successful as f64 / completed.len() as f64
        };

        SystemEffectiveness {
            total_loops: completed.len(),
            successful_loops: successful,
            success_rate,
            average_effectiveness: mean(&scores),
            average_duration_secs: mean(&durations),
            active_phases,
            risk_thresholds: self.learning.thresholds(),
            learning_weights: self.learning.weights(),
        }
    }

    /// Live analytic risk per node
    #[must_use]
    pub fn real_time_probabilities(&self) -> RealTimeRisk {
        real_time_probabilities(&self.graph.snapshot())
    }

    /// Forecast-side health summary
    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        let critical_nodes = self
            .critical_nodes(usize::MAX)
            .iter()
            .filter(|a| a.stabilization_priority > CRITICAL_PRIORITY)
            .count();
        let snapshot = self.graph.snapshot();
        let healths: Vec<f64> = snapshot.nodes().map(|n| n.health_score).collect();
        let loads: Vec<f64> = snapshot.nodes().map(cascade_forecast::InfrastructureNode::load_ratio).collect();
        let high_risk_nodes = snapshot
            .nodes()
            .filter(|n| n.health_score < 0.6 || n.load_ratio() > 0.9)
            .count();

        SystemMetrics {
            total_nodes: snapshot.node_count(),
            total_dependencies: snapshot.edge_count(),
            active_predictions: self.predictions.read().len(),
            critical_nodes,
            available_strategies: self.strategies.read().len(),
            average_health: mean(&healths),
            average_load: mean(&loads),
            high_risk_nodes,
            active_loops: self.loops.active_count(),
        }
    }

    /// Run one monitor tick and spawn loops for its detections
    #[tracing::instrument(skip_all)]
    pub async fn tick(&self) -> TickReport {
        let locks = self.loops.locks();
        let detections = self.monitor.tick(|node| locks.is_locked(node)).await;

        let mut report = TickReport {
            detections: detections.len(),
            ..TickReport::default()
        };
        for detection in detections {
            match self.loops.spawn(detection) {
                Ok(handle) => report.spawned.push(handle),
                Err(e) if e.is_rejection() => report.rejected += 1,
                Err(e) => tracing::warn!(error = %e, "Loop spawn failed"),
            }
        }

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("cascade_monitor_last_detections").set(report.detections as f64);
        tracing::debug!(
            detections = report.detections,
            spawned = report.spawned.len(),
            rejected = report.rejected,
            "Monitor tick complete"
        );
        report
    }

    /// Tick on the configured interval until `shutdown` becomes true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.monitor.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.config.monitor.interval_ms, "Monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Loops run detached; handles are only needed by callers that wait.
                    drop(self.tick().await);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(active = self.loops.active_count(), "Monitor stopped");
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        MockAgentDeployer, MockInfrastructureActuator, MockTelemetrySource, TelemetryFrame,
    };
    use cascade_forecast::{SimulationConfig, TopologySpec};

    fn engine() -> CascadeEngine {
        let graph = DependencyGraph::from_topology(&TopologySpec::metro_reference().unwrap()).unwrap();
        let mut telemetry = MockTelemetrySource::new();
        telemetry
            .expect_sample()
            .returning(|| Ok(TelemetryFrame::new(vec![])));
        let config = EngineConfig::new().with_forecast(
            cascade_forecast::ForecastConfig::new()
                .with_simulation(SimulationConfig::default().with_seed(3)),
        );
        CascadeEngine::new(
            graph,
            Collaborators::new(
                Arc::new(telemetry),
                Arc::new(MockAgentDeployer::new()),
                Arc::new(MockInfrastructureActuator::new()),
            ),
            config,
        )
    }

    #[test]
    fn critical_ranking_is_cached_per_revision() {
        let engine = engine();
        let first = engine.critical_nodes(3);
        assert_eq!(first.len(), 3);
        assert_eq!(engine.critical_nodes(3), first);

        let top = first[0].node_id.clone();
        engine.graph().update_condition(&top, 1.0, 0.0).unwrap();
        let refreshed = engine.critical_nodes(18);
        assert_eq!(refreshed.len(), 18);
        for pair in refreshed.windows(2) {
            assert!(pair[0].stabilization_priority >= pair[1].stabilization_priority);
        }
    }

    #[test]
    fn predictions_are_bounded_and_newest_first() {
        let mut engine = engine();
        engine.config.prediction_history = 2;
        let node = NodeId::from("power_main_mumbai");
        for _ in 0..3 {
            engine
                .predict_cascade(&node, FailureMode::PowerOutage, Some(50))
                .unwrap();
        }
        let kept = engine.predictions(10);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].timestamp >= kept[1].timestamp);
        assert_eq!(engine.system_metrics().active_predictions, 2);
    }

    #[test]
    fn empty_effectiveness_is_zeroed() {
        let engine = engine();
        let summary = engine.system_effectiveness();
        assert_eq!(summary.total_loops, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.risk_thresholds, RiskThresholds::default());
        assert_eq!(summary.active_phases.get("evaluating"), Some(&0));
    }

    #[test]
    fn snapshot_round_trips_topology() {
        let engine = engine();
        let snapshot = engine.snapshot("metro");
        assert_eq!(snapshot.topology.nodes.len(), 18);
        assert_eq!(snapshot.topology.edges.len(), 21);
    }
}
