//! Testing utilities for the cascade-guard workspace
//!
//! Shared graph fixtures and fake collaborators.

#![allow(missing_docs)]

use async_trait::async_trait;
use cascade_control::{
    ActionType, ActuationAck, AgentDeployer, Collaborators, ControlError, ControlResult,
    DeploymentReceipt, InfrastructureActuator, IntentAction, RiskDetection, RiskThresholds,
    RiskType, StabilizationIntent, TelemetryFrame, TelemetryReading, TelemetrySource,
};
use cascade_forecast::{
    DependencyEdge, DependencyGraph, InfrastructureNode, NodeCategory, NodeId, TopologySpec,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

// Fixtures

/// Failing substation feeding a clinic (weight 0.8) and a tower (weight 0.6)
pub fn substation_graph() -> DependencyGraph {
    let graph = DependencyGraph::new();
    graph
        .add_node(
            InfrastructureNode::new("substation", NodeCategory::PowerGrid)
                .with_load(100.0, 50.0)
                .with_health(0.1),
        )
        .unwrap();
    graph
        .add_node(
            InfrastructureNode::new("clinic", NodeCategory::Hospital)
                .with_load(100.0, 40.0)
                .with_health(0.95)
                .with_criticality(0.9),
        )
        .unwrap();
    graph
        .add_node(
            InfrastructureNode::new("tower", NodeCategory::TelecomTower)
                .with_load(100.0, 30.0)
                .with_health(0.95),
        )
        .unwrap();
    graph
        .add_edge(DependencyEdge::new("substation", "clinic", "power_supply", 0.8))
        .unwrap();
    graph
        .add_edge(DependencyEdge::new("substation", "tower", "power_supply", 0.6))
        .unwrap();
    graph
}

/// Built-in 18-node metropolitan network
pub fn metro_graph() -> DependencyGraph {
    DependencyGraph::from_topology(&TopologySpec::metro_reference().unwrap()).unwrap()
}

/// Readings for every node of `graph` at the given health
pub fn uniform_frame(graph: &DependencyGraph, health: f64) -> TelemetryFrame {
    let readings = graph
        .node_ids()
        .into_iter()
        .filter_map(|id| graph.node(&id))
        .map(|node| TelemetryReading::new(node.node_id, health, node.current_load))
        .collect();
    TelemetryFrame::new(readings)
}

/// Detection on `node` with the default threshold for `risk_type`
pub fn detection(node: &str, risk_type: RiskType, level: f64) -> RiskDetection {
    RiskDetection::new(node, risk_type, level, RiskThresholds::default().get(risk_type))
}

/// Bundle fakes into collaborators
pub fn collaborators(
    telemetry: impl TelemetrySource + 'static,
    deployer: impl AgentDeployer + 'static,
    actuator: impl InfrastructureActuator + 'static,
) -> Collaborators {
    Collaborators::new(Arc::new(telemetry), Arc::new(deployer), Arc::new(actuator))
}

// Telemetry fakes

/// Returns the same frame on every sample
#[derive(Debug, Clone)]
pub struct StaticTelemetry {
    frame: TelemetryFrame,
}

impl StaticTelemetry {
    pub fn new(frame: TelemetryFrame) -> Self {
        Self { frame }
    }

    pub fn empty() -> Self {
        Self::new(TelemetryFrame::new(Vec::new()))
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetry {
    async fn sample(&self) -> ControlResult<TelemetryFrame> {
        Ok(self.frame.clone())
    }
}

/// Returns queued frames in order, then the fallback forever
#[derive(Debug)]
pub struct ScriptedTelemetry {
    frames: Mutex<VecDeque<TelemetryFrame>>,
    fallback: TelemetryFrame,
    samples: AtomicUsize,
}

impl ScriptedTelemetry {
    pub fn new(frames: Vec<TelemetryFrame>, fallback: TelemetryFrame) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            fallback,
            samples: AtomicUsize::new(0),
        }
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn sample(&self) -> ControlResult<TelemetryFrame> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let next = self.frames.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Always errors
#[derive(Debug, Clone, Default)]
pub struct FailingTelemetry;

#[async_trait]
impl TelemetrySource for FailingTelemetry {
    async fn sample(&self) -> ControlResult<TelemetryFrame> {
        Err(ControlError::Telemetry("sensor network unreachable".into()))
    }
}

// Deployer fakes

/// Accepts every intent and counts calls
#[derive(Debug, Default)]
pub struct AcceptingDeployer {
    calls: AtomicUsize,
}

impl AcceptingDeployer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDeployer for AcceptingDeployer {
    async fn deploy(&self, intent: &StabilizationIntent) -> ControlResult<DeploymentReceipt> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DeploymentReceipt {
            accepted: true,
            deployment_ids: intent
                .actions
                .iter()
                .enumerate()
                .map(|(i, a)| format!("deploy-{n}-{i}-{}", a.action_type))
                .collect(),
            message: None,
        })
    }
}

/// Rejects every intent
#[derive(Debug, Clone, Default)]
pub struct RejectingDeployer;

#[async_trait]
impl AgentDeployer for RejectingDeployer {
    async fn deploy(&self, _intent: &StabilizationIntent) -> ControlResult<DeploymentReceipt> {
        Ok(DeploymentReceipt {
            accepted: false,
            deployment_ids: Vec::new(),
            message: Some("no agents available".into()),
        })
    }
}

/// Accepts only after `open` is called
#[derive(Debug)]
pub struct GatedDeployer {
    gate: Semaphore,
}

impl Default for GatedDeployer {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
        }
    }
}

impl GatedDeployer {
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl AgentDeployer for GatedDeployer {
    async fn deploy(&self, _intent: &StabilizationIntent) -> ControlResult<DeploymentReceipt> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ControlError::DeploymentFailed(e.to_string()))?;
        Ok(DeploymentReceipt {
            accepted: true,
            deployment_ids: vec!["gated".into()],
            message: None,
        })
    }
}

// Actuator fakes

/// Completes every action and records what it was asked to do
#[derive(Debug, Default)]
pub struct SucceedingActuator {
    executed: Mutex<Vec<(ActionType, Vec<NodeId>)>>,
}

impl SucceedingActuator {
    pub fn executed(&self) -> Vec<(ActionType, Vec<NodeId>)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl InfrastructureActuator for SucceedingActuator {
    async fn execute(&self, action: &IntentAction, targets: &[NodeId]) -> ControlResult<ActuationAck> {
        self.executed
            .lock()
            .push((action.action_type, targets.to_vec()));
        Ok(ActuationAck::completed())
    }
}

/// Never answers
#[derive(Debug, Clone, Default)]
pub struct HangingActuator;

#[async_trait]
impl InfrastructureActuator for HangingActuator {
    async fn execute(&self, _action: &IntentAction, _targets: &[NodeId]) -> ControlResult<ActuationAck> {
        std::future::pending().await
    }
}

/// Errors on every action
#[derive(Debug, Clone, Default)]
pub struct FailingActuator;

#[async_trait]
impl InfrastructureActuator for FailingActuator {
    async fn execute(&self, action: &IntentAction, _targets: &[NodeId]) -> ControlResult<ActuationAck> {
        Err(ControlError::ActuationFailed {
            action: action.action_type.to_string(),
            reason: "breaker stuck".into(),
        })
    }
}
