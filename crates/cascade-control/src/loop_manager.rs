//! Stabilization loop manager
//!
//! Spawns one tokio task per detection and drives it through
//! detect -> intent -> deploy -> control -> evaluate -> learn. At most one
//! loop is active per target node; the node lock is an RAII guard owned by
//! the loop task, so it is released even if the task panics.
//!
//! ```rust,ignore
//! let handle = manager.spawn(detection)?;
//! let record = handle.join().await?;
//! println!("{} finished as {}", record.loop_id, record.status());
//! ```

use crate::catalog::ActionCatalog;
use crate::collaborators::{ActuationStatus, Collaborators};
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::learning::{AdaptiveLearningStore, LoopOutcome};
use crate::monitor::assess_node;
use crate::phase::{validate_transition, LoopPhase};
use crate::types::{
    ControlRecord, ControlStatus, DeploymentRecord, EffectivenessMetrics, IntentAction, LoopId,
    RiskDetection, StabilizationIntent, StabilizationLoop,
};
use cascade_forecast::{
    CascadeSimulator, CriticalNodeAnalyzer, DependencyGraph, FailureMode, ForecastError,
    GraphSnapshot, NodeId,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

/// Per-node ownership table
#[derive(Debug, Default)]
pub struct NodeLocks {
    owners: DashMap<NodeId, LoopId>,
}

impl NodeLocks {
    /// Create empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a node for a loop
    ///
    /// # Errors
    /// - `ControlError::ConcurrentLoopRejected` if another loop owns the node
    pub fn try_acquire(self: &Arc<Self>, node: &NodeId, loop_id: LoopId) -> ControlResult<NodeLockGuard> {
        match self.owners.entry(node.clone()) {
            Entry::Occupied(entry) => Err(ControlError::ConcurrentLoopRejected {
                node: node.clone(),
                owner: *entry.get(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(loop_id);
                Ok(NodeLockGuard {
                    locks: Arc::clone(self),
                    node: node.clone(),
                    loop_id,
                })
            }
        }
    }

    /// Loop currently owning a node
    #[must_use]
    pub fn owner(&self, node: &NodeId) -> Option<LoopId> {
        self.owners.get(node).map(|entry| *entry.value())
    }

    /// Check if a node is owned by an active loop
    #[inline]
    #[must_use]
    pub fn is_locked(&self, node: &NodeId) -> bool {
        self.owners.contains_key(node)
    }

    /// Number of locked nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no node is locked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Releases a node lock on drop
#[derive(Debug)]
pub struct NodeLockGuard {
    locks: Arc<NodeLocks>,
    node: NodeId,
    loop_id: LoopId,
}

impl NodeLockGuard {
    /// Locked node
    #[inline]
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

impl Drop for NodeLockGuard {
    fn drop(&mut self) {
        let loop_id = self.loop_id;
        self.locks
            .owners
            .remove_if(&self.node, |_, owner| *owner == loop_id);
    }
}

/// Handle to a running loop
#[derive(Debug)]
pub struct LoopHandle {
    /// Loop id
    pub loop_id: LoopId,
    /// Target node
    pub node_id: NodeId,
    join: JoinHandle<StabilizationLoop>,
}

impl LoopHandle {
    /// Wait for the loop to reach a terminal phase
    ///
    /// # Errors
    /// - `ControlError::LoopAborted` if the loop task panicked
    pub async fn join(self) -> ControlResult<StabilizationLoop> {
        self.join
            .await
            .map_err(|e| ControlError::LoopAborted(e.to_string()))
    }
}

struct LoopContext {
    graph: Arc<DependencyGraph>,
    learning: Arc<AdaptiveLearningStore>,
    collaborators: Collaborators,
    simulator: CascadeSimulator,
    analyzer: CriticalNodeAnalyzer,
    catalog: ActionCatalog,
    config: ControlConfig,
    locks: Arc<NodeLocks>,
    active: DashMap<LoopId, StabilizationLoop>,
    completed: Mutex<VecDeque<StabilizationLoop>>,
}

/// Owner of all stabilization loops
pub struct LoopManager {
    ctx: Arc<LoopContext>,
}

impl fmt::Debug for LoopManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopManager")
            .field("active", &self.ctx.active.len())
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl LoopManager {
    /// Create manager
    #[must_use]
    pub fn new(
        graph: Arc<DependencyGraph>,
        learning: Arc<AdaptiveLearningStore>,
        collaborators: Collaborators,
        simulator: CascadeSimulator,
        catalog: ActionCatalog,
        config: ControlConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(LoopContext {
                graph,
                learning,
                collaborators,
                simulator,
                analyzer: CriticalNodeAnalyzer::new(),
                catalog,
                config,
                locks: Arc::new(NodeLocks::new()),
                active: DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Loop settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        &self.ctx.config
    }

    /// Node ownership table
    #[inline]
    #[must_use]
    pub fn locks(&self) -> &NodeLocks {
        &self.ctx.locks
    }

    /// Spawn a loop for a detection
    ///
    /// # Errors
    /// - `ControlError::ConcurrentLoopRejected` if the target already has an
    ///   active loop; the detection is dropped
    #[tracing::instrument(skip_all, fields(node = %detection.target_node, risk_type = %detection.risk_type))]
    pub fn spawn(&self, detection: RiskDetection) -> ControlResult<LoopHandle> {
        let loop_id = LoopId::new();
        let node_id = detection.target_node.clone();

        let guard = match self.ctx.locks.try_acquire(&node_id, loop_id) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected loop spawn");
                metrics::counter!("cascade_loops_rejected_total").increment(1);
                return Err(e);
            }
        };

        let record = StabilizationLoop::new(loop_id, detection);
        self.ctx.active.insert(loop_id, record.clone());
        metrics::counter!("cascade_loops_started_total").increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("cascade_loops_active").set(self.ctx.active.len() as f64);
        tracing::info!(loop_id = %loop_id, "Stabilization loop started");

        let slot = LoopSlot {
            ctx: Arc::clone(&self.ctx),
            loop_id,
            _lock: guard,
        };
        let join = tokio::spawn(run_loop(slot, record));

        Ok(LoopHandle {
            loop_id,
            node_id,
            join,
        })
    }

    /// Active loops, oldest first
    #[must_use]
    pub fn active_loops(&self) -> Vec<StabilizationLoop> {
        let mut loops: Vec<StabilizationLoop> =
            self.ctx.active.iter().map(|e| e.value().clone()).collect();
        loops.sort_by_key(|l| (l.start_time, l.loop_id));
        loops
    }

    /// Number of active loops
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.ctx.active.len()
    }

    /// Completed loops, newest first
    #[must_use]
    pub fn completed_loops(&self, limit: usize) -> Vec<StabilizationLoop> {
        self.ctx
            .completed
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Replace completed history, oldest first
    pub fn restore_completed(&self, loops: Vec<StabilizationLoop>) {
        let mut completed = self.ctx.completed.lock();
        completed.clear();
        let skip = loops.len().saturating_sub(self.ctx.config.completed_history);
        completed.extend(loops.into_iter().skip(skip));
    }
}

/// Loop task's claim on its node and active entry
///
/// Dropping the slot removes a leftover active entry and releases the node
/// lock, which covers panicking loop tasks.
struct LoopSlot {
    ctx: Arc<LoopContext>,
    loop_id: LoopId,
    _lock: NodeLockGuard,
}

impl Drop for LoopSlot {
    fn drop(&mut self) {
        if self.ctx.active.remove(&self.loop_id).is_some() {
            tracing::warn!(loop_id = %self.loop_id, "Loop task ended without finalizing");
        }
    }
}

async fn run_loop(slot: LoopSlot, mut record: StabilizationLoop) -> StabilizationLoop {
    let ctx = Arc::clone(&slot.ctx);
    let started = Instant::now();

    if let Err(e) = drive(&ctx, &mut record, started).await {
        tracing::warn!(loop_id = %record.loop_id, phase = %record.phase, error = %e, "Loop failed");
        record.failure_reason = Some(e.to_string());
        record.phase = LoopPhase::Failed;
    }

    let record = finalize(&ctx, record);
    drop(slot);
    record
}

async fn drive(ctx: &LoopContext, record: &mut StabilizationLoop, started: Instant) -> ControlResult<()> {
    let detection = record.detection.clone();
    let mode = detection.risk_type.failure_mode();

    // Intent
    let snapshot = ctx.graph.snapshot();
    let idx = snapshot
        .index_of(&detection.target_node)
        .ok_or_else(|| ForecastError::NodeNotFound(detection.target_node.clone()))?;
    let analysis = ctx.analyzer.analyze_node(&snapshot, idx);
    let intent = ctx.catalog.build_intent(&detection, &snapshot, Some(&analysis))?;
    let health_before: HashMap<NodeId, f64> = detection
        .affected_nodes
        .iter()
        .filter_map(|id| snapshot.node(id).map(|n| (id.clone(), n.health_score)))
        .collect();
    let baseline = simulate(ctx, snapshot, &detection.target_node, mode).await?;
    record.intent = Some(intent.clone());
    transition(ctx, record, LoopPhase::IntentGenerated)?;

    // Deploy
    transition(ctx, record, LoopPhase::AgentDeploying)?;
    record.deployment = Some(deploy(ctx, &intent).await?);

    // Control
    transition(ctx, record, LoopPhase::InfrastructureControlling)?;
    for action in &intent.actions {
        let control = actuate(ctx, action).await;
        record.controls.push(control);
        ctx.active.insert(record.loop_id, record.clone());
    }

    // Evaluate
    transition(ctx, record, LoopPhase::Evaluating)?;
    let metrics = evaluate(ctx, record, &health_before, baseline, mode, started).await?;
    let overall = metrics.overall_effectiveness;
    record.effectiveness = Some(metrics);

    let any_completed = record
        .controls
        .iter()
        .any(|c| c.status == ControlStatus::Completed);
    let terminal = if !any_completed {
        record.failure_reason = Some(format!(
            "no control action completed ({} attempted)",
            record.controls.len()
        ));
        LoopPhase::Failed
    } else if overall >= ctx.config.stable_threshold {
        LoopPhase::Stable
    } else if overall >= ctx.config.recovering_threshold {
        LoopPhase::Recovering
    } else {
        record.failure_reason = Some(format!(
            "effectiveness {overall:.3} below {:.3}",
            ctx.config.recovering_threshold
        ));
        LoopPhase::Failed
    };
    transition(ctx, record, terminal)
}

fn transition(ctx: &LoopContext, record: &mut StabilizationLoop, to: LoopPhase) -> ControlResult<()> {
    validate_transition(record.phase, to)?;
    tracing::debug!(loop_id = %record.loop_id, from = %record.phase, to = %to, "Loop phase change");
    record.phase = to;
    if !to.is_terminal() {
        ctx.active.insert(record.loop_id, record.clone());
    }
    Ok(())
}

async fn simulate(
    ctx: &LoopContext,
    snapshot: GraphSnapshot,
    start: &NodeId,
    mode: FailureMode,
) -> ControlResult<f64> {
    let simulator = ctx.simulator.clone();
    let start = start.clone();
    let trials = Some(ctx.config.evaluation_trials);
    let prediction = tokio::task::spawn_blocking(move || {
        simulator.simulate_snapshot(&snapshot, &start, mode, trials)
    })
    .await
    .map_err(|e| ControlError::LoopAborted(e.to_string()))??;
    Ok(prediction.cascade_probability)
}

async fn deploy(ctx: &LoopContext, intent: &StabilizationIntent) -> ControlResult<DeploymentRecord> {
    let deploy_timeout = ctx.config.deploy_timeout();
    let receipt = match timeout(deploy_timeout, ctx.collaborators.deployer.deploy(intent)).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(e)) => return Err(ControlError::DeploymentFailed(e.to_string())),
        Err(_) => {
            return Err(ControlError::DeploymentFailed(format!(
                "timed out after {} ms",
                ctx.config.deploy_timeout_ms
            )))
        }
    };

    if !receipt.accepted {
        let reason = receipt
            .message
            .unwrap_or_else(|| "rejected by deployer".to_string());
        return Err(ControlError::DeploymentFailed(reason));
    }

    tracing::debug!(deployments = receipt.deployment_ids.len(), "Agents deployed");
    Ok(DeploymentRecord {
        deployment_ids: receipt.deployment_ids,
        accepted: true,
        recorded_at: Utc::now(),
    })
}

async fn actuate(ctx: &LoopContext, action: &IntentAction) -> ControlRecord {
    let call = ctx
        .collaborators
        .actuator
        .execute(action, &action.target_nodes);
    let result = match timeout(ctx.config.actuation_timeout(), call).await {
        Ok(Ok(ack)) if ack.status == ActuationStatus::Completed => Ok(()),
        Ok(Ok(_)) => Err("rejected by actuator".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {} ms", ctx.config.actuation_timeout_ms)),
    };

    let error = match result {
        Ok(()) => {
            let effect = action.action_type.nominal_effect();
            for target in &action.target_nodes {
                if let Err(e) = ctx.graph.apply_effect(
                    target,
                    effect.health_gain,
                    effect.load_relief,
                    effect.redundancy_gain,
                ) {
                    tracing::warn!(node = %target, error = %e, "Could not apply action effect");
                }
            }
            None
        }
        Err(reason) => {
            let err = ControlError::ActuationFailed {
                action: action.action_type.to_string(),
                reason,
            };
            tracing::warn!(error = %err, "Control action failed");
            Some(err.to_string())
        }
    };

    ControlRecord {
        action_type: action.action_type,
        target_nodes: action.target_nodes.clone(),
        status: if error.is_none() {
            ControlStatus::Completed
        } else {
            ControlStatus::Failed
        },
        error,
        executed_at: Utc::now(),
    }
}

async fn evaluate(
    ctx: &LoopContext,
    record: &StabilizationLoop,
    health_before: &HashMap<NodeId, f64>,
    baseline: f64,
    mode: FailureMode,
    started: Instant,
) -> ControlResult<EffectivenessMetrics> {
    tokio::time::sleep(ctx.config.settle()).await;

    let detection = &record.detection;
    let sample = timeout(
        ctx.config.telemetry_timeout(),
        ctx.collaborators.telemetry.sample(),
    )
    .await;
    match sample {
        Ok(Ok(frame)) => {
            for reading in frame
                .readings
                .iter()
                .filter(|r| detection.affected_nodes.contains(&r.node_id))
            {
                if let Err(e) = ctx.graph.update_condition(
                    &reading.node_id,
                    reading.health_score,
                    reading.current_load,
                ) {
                    tracing::warn!(node = %reading.node_id, error = %e, "Skipping evaluation reading");
                }
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Evaluation telemetry failed, using stored state");
        }
        Err(_) => {
            tracing::warn!("Evaluation telemetry timed out, using stored state");
        }
    }

    let snapshot = ctx.graph.snapshot();
    let idx = snapshot
        .index_of(&detection.target_node)
        .ok_or_else(|| ForecastError::NodeNotFound(detection.target_node.clone()))?;
    let pre_level = detection.risk_level;
    let post_level = assess_node(&snapshot, idx).level(detection.risk_type);
    let risk_reduction_delta = pre_level - post_level;
    let normalized_risk_reduction = if pre_level > 0.0 {
        (risk_reduction_delta / pre_level).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let recovered = detection
        .affected_nodes
        .iter()
        .filter(|id| {
            health_before
                .get(*id)
                .is_some_and(|before| *before <= ctx.config.recovered_health)
        })
        .filter_map(|id| snapshot.node(id))
        .filter(|node| node.health_score > ctx.config.recovered_health)
        .count();
    let elapsed = started.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let recovery_speed = recovered as f64 / (elapsed / 60.0).max(1.0);
    let normalized_recovery_speed = if ctx.config.recovery_speed_reference > 0.0 {
        (recovery_speed / ctx.config.recovery_speed_reference).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let post = simulate(ctx, snapshot, &detection.target_node, mode).await?;
    let cascade_containment_success = (1.0 - post).clamp(0.0, 1.0);

    let weights = ctx.learning.weights();
    let overall_effectiveness = weights
        .combine(
            normalized_risk_reduction,
            normalized_recovery_speed,
            cascade_containment_success,
        )
        .clamp(0.0, 1.0);

    Ok(EffectivenessMetrics {
        risk_reduction_delta,
        normalized_risk_reduction,
        recovery_speed,
        normalized_recovery_speed,
        cascade_containment_success,
        overall_effectiveness,
        baseline_cascade_probability: baseline,
        post_cascade_probability: post,
        measurement_window_secs: elapsed,
    })
}

fn finalize(ctx: &LoopContext, mut record: StabilizationLoop) -> StabilizationLoop {
    record.end_time = Some(Utc::now());
    let status = record.status();

    record.learning_updates = ctx.learning.record_outcome(LoopOutcome {
        loop_id: record.loop_id,
        risk_type: record.detection.risk_type,
        risk_level: record.detection.risk_level,
        effectiveness: record.effectiveness.clone(),
        status,
        recorded_at: Utc::now(),
    });

    // Leave the active set before the history so no reader sees the loop in both
    ctx.active.remove(&record.loop_id);
    {
        let mut completed = ctx.completed.lock();
        completed.push_back(record.clone());
        while completed.len() > ctx.config.completed_history {
            completed.pop_front();
        }
    }

    metrics::counter!("cascade_loops_completed_total", "status" => status.as_str()).increment(1);
    if let Some(effectiveness) = &record.effectiveness {
        metrics::histogram!("cascade_loop_effectiveness").record(effectiveness.overall_effectiveness);
    }
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("cascade_loops_active").set(ctx.active.len() as f64);

    tracing::info!(
        loop_id = %record.loop_id,
        node = %record.detection.target_node,
        status = %status,
        effectiveness = record.effectiveness.as_ref().map(|e| e.overall_effectiveness),
        updates = record.learning_updates.len(),
        "Stabilization loop finished"
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ActuationAck, DeploymentReceipt, MockAgentDeployer, MockInfrastructureActuator,
        MockTelemetrySource, TelemetryFrame,
    };
    use crate::types::{LoopStatus, RiskType};
    use cascade_forecast::{InfrastructureNode, NodeCategory, SimulationConfig};

    fn manager(deployer: MockAgentDeployer, actuator: MockInfrastructureActuator) -> LoopManager {
        let graph = DependencyGraph::new();
        graph
            .add_node(
                InfrastructureNode::new("substation", NodeCategory::PowerGrid).with_health(0.1),
            )
            .unwrap();
        let mut telemetry = MockTelemetrySource::new();
        telemetry
            .expect_sample()
            .returning(|| Ok(TelemetryFrame::new(vec![])));

        LoopManager::new(
            Arc::new(graph),
            Arc::new(AdaptiveLearningStore::new()),
            Collaborators::new(Arc::new(telemetry), Arc::new(deployer), Arc::new(actuator)),
            CascadeSimulator::new(SimulationConfig::default().with_seed(11)),
            ActionCatalog::standard(),
            ControlConfig::default().with_settle(std::time::Duration::ZERO),
        )
    }

    fn detection() -> RiskDetection {
        RiskDetection::new("substation", RiskType::FailureRate, 0.9, 0.3)
    }

    #[test]
    fn lock_guard_releases_on_drop() {
        let locks = Arc::new(NodeLocks::new());
        let node = NodeId::from("n");
        let guard = locks.try_acquire(&node, LoopId::new()).unwrap();
        assert!(locks.is_locked(&node));
        assert!(locks.try_acquire(&node, LoopId::new()).unwrap_err().is_rejection());
        drop(guard);
        assert!(locks.is_empty());
        assert!(locks.try_acquire(&node, LoopId::new()).is_ok());
    }

    #[tokio::test]
    async fn rejected_deployment_fails_loop_and_releases_lock() {
        let mut deployer = MockAgentDeployer::new();
        deployer.expect_deploy().times(1).returning(|_| {
            Ok(DeploymentReceipt {
                accepted: false,
                deployment_ids: vec![],
                message: Some("no agents available".into()),
            })
        });
        let mut actuator = MockInfrastructureActuator::new();
        actuator.expect_execute().never();
        let manager = manager(deployer, actuator);

        let record = manager.spawn(detection()).unwrap().join().await.unwrap();
        assert_eq!(record.status(), LoopStatus::Failed);
        assert!(record.intent.is_some());
        assert!(record.effectiveness.is_none());
        assert_eq!(record.failure_reason.as_deref(), Some("agent deployment failed: no agents available"));
        assert!(!manager.locks().is_locked(&"substation".into()));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.completed_loops(10).len(), 1);
    }

    #[tokio::test]
    async fn second_spawn_on_same_node_is_rejected() {
        let mut deployer = MockAgentDeployer::new();
        deployer.expect_deploy().returning(|_| {
            Ok(DeploymentReceipt {
                accepted: true,
                deployment_ids: vec!["agent-1".into()],
                message: None,
            })
        });
        let mut actuator = MockInfrastructureActuator::new();
        actuator
            .expect_execute()
            .returning(|_, _| Ok(ActuationAck::completed()));
        let manager = manager(deployer, actuator);

        let first = manager.spawn(detection()).unwrap();
        let err = manager.spawn(detection()).unwrap_err();
        assert!(matches!(err, ControlError::ConcurrentLoopRejected { owner, .. } if owner == first.loop_id));

        let record = first.join().await.unwrap();
        assert!(record.status().is_terminal());
        assert!(record.controls.iter().all(|c| c.status == ControlStatus::Completed));
        assert!(manager.spawn(detection()).is_ok());
    }

    #[tokio::test]
    async fn loop_without_completed_actions_fails() {
        let mut deployer = MockAgentDeployer::new();
        deployer.expect_deploy().returning(|_| {
            Ok(DeploymentReceipt {
                accepted: true,
                deployment_ids: vec!["agent-1".into()],
                message: None,
            })
        });
        let mut actuator = MockInfrastructureActuator::new();
        actuator
            .expect_execute()
            .returning(|_, _| Ok(ActuationAck::rejected()));
        let manager = manager(deployer, actuator);

        let record = manager.spawn(detection()).unwrap().join().await.unwrap();
        assert_eq!(record.status(), LoopStatus::Failed);
        assert!(!record.controls.is_empty());
        assert!(record.controls.iter().all(|c| c.status == ControlStatus::Failed));
        assert!(record.effectiveness.is_some());
        assert!(record
            .failure_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("no control action completed")));
        assert!(!manager.locks().is_locked(&"substation".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finished_loop_leaves_active_set_before_history() {
        let mut deployer = MockAgentDeployer::new();
        deployer.expect_deploy().returning(|_| {
            Ok(DeploymentReceipt {
                accepted: true,
                deployment_ids: vec!["agent-1".into()],
                message: None,
            })
        });
        let mut actuator = MockInfrastructureActuator::new();
        actuator
            .expect_execute()
            .returning(|_, _| Ok(ActuationAck::completed()));
        let manager = manager(deployer, actuator);

        let handle = manager.spawn(detection()).unwrap();
        let loop_id = handle.loop_id;
        loop {
            if manager.completed_loops(10).iter().any(|l| l.loop_id == loop_id) {
                assert!(manager.active_loops().iter().all(|l| l.loop_id != loop_id));
                break;
            }
            tokio::task::yield_now().await;
        }
        handle.join().await.unwrap();
        assert_eq!(manager.active_count(), 0);
    }
}
