//! Cascade Control - closed-loop infrastructure stabilization
//!
//! Provides:
//! - A risk monitor that turns telemetry into risk detections
//! - Per-node stabilization loops: intent, deployment, control, evaluation
//! - An adaptive learning store that tunes thresholds and weights
//! - The engine facade with the query surface and periodic runner
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_control::prelude::*;
//!
//! let graph = DependencyGraph::from_topology(&TopologySpec::metro_reference()?)?;
//! let engine = Arc::new(CascadeEngine::new(graph, collaborators, EngineConfig::new()));
//!
//! let (stop, shutdown) = tokio::sync::watch::channel(false);
//! let runner = tokio::spawn(Arc::clone(&engine).run(shutdown));
//! // ...
//! stop.send(true)?;
//! runner.await?;
//! ```

#![warn(unreachable_pub)]

pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod learning;
pub mod loop_manager;
pub mod monitor;
pub mod persistence;
pub mod phase;
pub mod types;

// Re-exports for convenience
pub use catalog::{ActionCatalog, CategoryAction, RiskAction};
pub use collaborators::{
    ActuationAck, ActuationStatus, AgentDeployer, Collaborators, DeploymentReceipt,
    InfrastructureActuator, TelemetryFrame, TelemetryReading, TelemetrySource,
};
pub use config::{ControlConfig, EngineConfig, MonitorConfig};
pub use engine::{CascadeEngine, SystemEffectiveness, SystemMetrics, TickReport};
pub use error::{ControlError, ControlResult};
pub use learning::{
    AdaptiveLearningStore, EffectivenessComponent, LearningSnapshot, LearningUpdate,
    LearningWeights, LoopOutcome, RiskThresholds,
};
pub use loop_manager::{LoopHandle, LoopManager, NodeLockGuard, NodeLocks};
pub use monitor::{RealTimeRisk, RiskAssessment, RiskLabel, RiskMonitor};
pub use persistence::EngineSnapshot;
pub use phase::LoopPhase;
pub use types::{
    ActionEffect, ActionType, ControlRecord, ControlStatus, DeploymentRecord, DetectionId,
    EffectivenessMetrics, IntentAction, IntentId, LoopId, LoopStatus, RiskDetection, RiskType,
    StabilizationIntent, StabilizationLoop,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the controller
    pub use crate::{
        AgentDeployer, CascadeEngine, Collaborators, ControlError, EngineConfig,
        InfrastructureActuator, LoopStatus, RiskDetection, RiskType, TelemetrySource,
    };
    pub use cascade_forecast::prelude::*;
    pub use std::sync::Arc;
}
