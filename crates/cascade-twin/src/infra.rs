//! Simulated physical infrastructure
//!
//! Keeps its own model of node conditions, separate from the engine's graph.
//! Health and load drift each sample, faults strike at random, and
//! completed actions improve the modelled nodes.

use async_trait::async_trait;
use cascade_control::{
    ActuationAck, AgentDeployer, ControlResult, DeploymentReceipt, InfrastructureActuator,
    IntentAction, StabilizationIntent, TelemetryFrame, TelemetryReading, TelemetrySource,
};
use cascade_forecast::{NodeId, TopologySpec};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Behaviour of the simulated world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct TwinSettings {
    /// Chance per node per sample of a sudden fault
    pub(crate) fault_rate: f64,
    /// Health lost by a faulted node, as a fraction of its current health
    pub(crate) fault_severity: f64,
    /// Max absolute health change per sample
    pub(crate) health_drift: f64,
    /// Max relative load change per sample
    pub(crate) load_drift: f64,
    /// Chance the deployer accepts an intent
    pub(crate) deploy_acceptance: f64,
    /// Chance an action completes
    pub(crate) actuation_success: f64,
    /// Upper bound on simulated actuation latency
    pub(crate) max_latency_ms: u64,
}

impl Default for TwinSettings {
    fn default() -> Self {
        Self {
            fault_rate: 0.02,
            fault_severity: 0.7,
            health_drift: 0.02,
            load_drift: 0.05,
            deploy_acceptance: 0.95,
            actuation_success: 0.9,
            max_latency_ms: 50,
        }
    }
}

#[derive(Debug, Clone)]
struct ModelNode {
    capacity: f64,
    load: f64,
    health: f64,
}

#[derive(Debug)]
struct TwinState {
    rng: StdRng,
    nodes: BTreeMap<NodeId, ModelNode>,
    deployments: u64,
}

/// Telemetry source, deployer and actuator backed by one world model
#[derive(Debug)]
pub(crate) struct SimulatedInfrastructure {
    settings: TwinSettings,
    state: Mutex<TwinState>,
}

impl SimulatedInfrastructure {
    /// Model seeded from a topology's current conditions
    pub(crate) fn new(topology: &TopologySpec, settings: TwinSettings, seed: u64) -> Self {
        let nodes = topology
            .nodes
            .iter()
            .map(|n| {
                (
                    n.node_id.clone(),
                    ModelNode {
                        capacity: n.capacity,
                        load: n.current_load,
                        health: n.health_score,
                    },
                )
            })
            .collect();

        Self {
            settings,
            state: Mutex::new(TwinState {
                rng: StdRng::seed_from_u64(seed),
                nodes,
                deployments: 0,
            }),
        }
    }

    /// Modelled health of a node
    #[cfg(test)]
    pub(crate) fn health(&self, node: &NodeId) -> Option<f64> {
        self.state.lock().nodes.get(node).map(|n| n.health)
    }

    /// Force a node's modelled health
    pub(crate) fn inject_fault(&self, node: &NodeId, health: f64) -> bool {
        match self.state.lock().nodes.get_mut(node) {
            Some(model) => {
                model.health = health.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    fn step(&self) -> Vec<TelemetryReading> {
        let mut state = self.state.lock();
        let TwinState { rng, nodes, .. } = &mut *state;
        let settings = &self.settings;

        nodes
            .iter_mut()
            .map(|(id, model)| {
                let drift = settings.health_drift.max(0.0);
                model.health = (model.health + rng.random_range(-drift..=drift)).clamp(0.0, 1.0);
                if rng.random_bool(settings.fault_rate.clamp(0.0, 1.0)) {
                    model.health *= 1.0 - settings.fault_severity.clamp(0.0, 1.0);
                    tracing::debug!(node = %id, health = model.health, "Simulated fault");
                }

                let swing = settings.load_drift.max(0.0);
                let factor = 1.0 + rng.random_range(-swing..=swing);
                model.load = (model.load * factor).clamp(0.0, model.capacity * 1.2);

                TelemetryReading::new(id.clone(), model.health, model.load)
            })
            .collect()
    }
}

#[async_trait]
impl TelemetrySource for SimulatedInfrastructure {
    async fn sample(&self) -> ControlResult<TelemetryFrame> {
        Ok(TelemetryFrame::new(self.step()))
    }
}

#[async_trait]
impl AgentDeployer for SimulatedInfrastructure {
    async fn deploy(&self, intent: &StabilizationIntent) -> ControlResult<DeploymentReceipt> {
        let mut state = self.state.lock();
        if !state
            .rng
            .random_bool(self.settings.deploy_acceptance.clamp(0.0, 1.0))
        {
            return Ok(DeploymentReceipt {
                accepted: false,
                deployment_ids: Vec::new(),
                message: Some("agent pool exhausted".to_string()),
            });
        }

        state.deployments += 1;
        let batch = state.deployments;
        Ok(DeploymentReceipt {
            accepted: true,
            deployment_ids: intent
                .actions
                .iter()
                .map(|a| format!("{}-{batch}-{}", intent.intent_id, a.action_type))
                .collect(),
            message: None,
        })
    }
}

#[async_trait]
impl InfrastructureActuator for SimulatedInfrastructure {
    async fn execute(&self, action: &IntentAction, targets: &[NodeId]) -> ControlResult<ActuationAck> {
        let (latency, success) = {
            let mut state = self.state.lock();
            let latency = state.rng.random_range(0..=self.settings.max_latency_ms);
            let success = state
                .rng
                .random_bool(self.settings.actuation_success.clamp(0.0, 1.0));
            (latency, success)
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if !success {
            tracing::debug!(action = %action.action_type, "Simulated actuation rejected");
            return Ok(ActuationAck::rejected());
        }

        let effect = action.action_type.nominal_effect();
        let mut state = self.state.lock();
        for target in targets {
            if let Some(model) = state.nodes.get_mut(target) {
                model.health = (model.health + effect.health_gain).min(1.0);
                model.load = (model.load * (1.0 - effect.load_relief)).max(0.0);
            }
        }
        Ok(ActuationAck::completed())
    }
}
