//! External collaborator interfaces
//!
//! The controller never talks to sensors, agents or equipment directly.
//! Telemetry, agent deployment and actuation are injected behind these
//! traits; every call is wrapped in a timeout by the caller.

use crate::error::ControlResult;
use crate::types::{IntentAction, StabilizationIntent};
use async_trait::async_trait;
use cascade_forecast::{DependencyEdge, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Measured condition of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Node measured
    pub node_id: NodeId,
    /// Health, clamped on ingestion
    pub health_score: f64,
    /// Absolute load
    pub current_load: f64,
}

impl TelemetryReading {
    /// Create reading
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, health_score: f64, current_load: f64) -> Self {
        Self {
            node_id: node_id.into(),
            health_score,
            current_load,
        }
    }
}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Node readings
    pub readings: Vec<TelemetryReading>,
    /// Newly discovered dependencies
    #[serde(default)]
    pub new_edges: Vec<DependencyEdge>,
    /// Sample time
    pub sampled_at: DateTime<Utc>,
}

impl TelemetryFrame {
    /// Create frame from readings
    #[must_use]
    pub fn new(readings: Vec<TelemetryReading>) -> Self {
        Self {
            readings,
            new_edges: Vec::new(),
            sampled_at: Utc::now(),
        }
    }

    /// With newly discovered edges
    #[inline]
    #[must_use]
    pub fn with_edges(mut self, edges: Vec<DependencyEdge>) -> Self {
        self.new_edges = edges;
        self
    }
}

/// Answer from the agent deployment collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    /// Whether the intent was accepted
    pub accepted: bool,
    /// Ids of deployed agents
    pub deployment_ids: Vec<String>,
    /// Free-form explanation
    #[serde(default)]
    pub message: Option<String>,
}

/// Actuation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationStatus {
    /// Executed
    Completed,
    /// Refused by the equipment or operator
    Rejected,
}

/// Acknowledgment of one control action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationAck {
    /// Outcome
    pub status: ActuationStatus,
    /// Acknowledgment time
    pub timestamp: DateTime<Utc>,
}

impl ActuationAck {
    /// Completed acknowledgment stamped now
    #[must_use]
    pub fn completed() -> Self {
        Self {
            status: ActuationStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    /// Rejected acknowledgment stamped now
    #[must_use]
    pub fn rejected() -> Self {
        Self {
            status: ActuationStatus::Rejected,
            timestamp: Utc::now(),
        }
    }
}

/// Source of node measurements
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Take one sample of the monitored infrastructure
    async fn sample(&self) -> ControlResult<TelemetryFrame>;
}

/// Dispatcher of field agents for an intent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentDeployer: Send + Sync {
    /// Deploy agents for an intent
    async fn deploy(&self, intent: &StabilizationIntent) -> ControlResult<DeploymentReceipt>;
}

/// Executor of control actions on physical infrastructure
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InfrastructureActuator: Send + Sync {
    /// Execute one action on the given targets
    async fn execute(&self, action: &IntentAction, targets: &[NodeId])
        -> ControlResult<ActuationAck>;
}

/// The three collaborators a controller needs
#[derive(Clone)]
pub struct Collaborators {
    /// Telemetry source
    pub telemetry: Arc<dyn TelemetrySource>,
    /// Agent deployer
    pub deployer: Arc<dyn AgentDeployer>,
    /// Infrastructure actuator
    pub actuator: Arc<dyn InfrastructureActuator>,
}

impl Collaborators {
    /// Bundle collaborators
    #[must_use]
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        deployer: Arc<dyn AgentDeployer>,
        actuator: Arc<dyn InfrastructureActuator>,
    ) -> Self {
        Self {
            telemetry,
            deployer,
            actuator,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
