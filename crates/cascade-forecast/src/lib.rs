//! Cascade Forecast - infrastructure dependency graph and failure forecasting
//!
//! Provides:
//! - A concurrent dependency graph of infrastructure nodes
//! - Monte-Carlo simulation of cascading failures
//! - Critical-node scoring and ranking
//! - Pre-stabilization strategies backed by what-if simulation
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_forecast::prelude::*;
//!
//! let graph = DependencyGraph::from_topology(&TopologySpec::metro_reference()?)?;
//! let simulator = CascadeSimulator::new(SimulationConfig::default().with_seed(7));
//!
//! let prediction = simulator.simulate(
//!     &graph,
//!     &NodeId::from("power_main_mumbai"),
//!     FailureMode::PowerOutage,
//!     None,
//! )?;
//! println!("cascade probability {:.2}", prediction.cascade_probability);
//! ```

#![warn(unreachable_pub)]

pub mod analyzer;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod simulator;
pub mod topology;
pub mod types;

// Re-exports for convenience
pub use analyzer::{CriticalNodeAnalysis, CriticalNodeAnalyzer, RecommendedAction};
pub use config::{ForecastConfig, PlannerConfig, SimulationConfig};
pub use error::{ForecastError, ForecastResult};
pub use graph::{DependencyGraph, GraphSnapshot};
pub use planner::{
    PlannedAction, PlannedActionType, PreStabilizationPlanner, PreStabilizationStrategy,
    StrategyKind,
};
pub use simulator::{CascadePrediction, CascadeSimulator, FailureEvent};
pub use topology::{TopologyFormat, TopologySpec};
pub use types::{
    DependencyEdge, FailureMode, GeoLocation, InfrastructureNode, NodeCategory, NodeId,
    PredictionId, StrategyId, MAX_REDUNDANCY,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the forecast engine
    pub use crate::{
        CascadePrediction, CascadeSimulator, CriticalNodeAnalyzer, DependencyEdge,
        DependencyGraph, FailureMode, ForecastConfig, ForecastError, InfrastructureNode,
        NodeCategory, NodeId, PreStabilizationPlanner, SimulationConfig, TopologySpec,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
