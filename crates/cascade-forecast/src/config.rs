//! Forecast engine configuration
//!
//! All values have documented defaults; a missing or partial config file
//! falls back to them field by field.

use serde::{Deserialize, Serialize};

/// Forecast engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Cascade simulator settings
    pub simulation: SimulationConfig,
    /// Pre-stabilization planner settings
    pub planner: PlannerConfig,
}

impl ForecastConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With simulation settings
    #[inline]
    #[must_use]
    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    /// With planner settings
    #[inline]
    #[must_use]
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }
}

/// Monte-Carlo cascade simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Trials used when the caller does not specify a count
    pub default_trials: usize,
    /// Requests below this many trials are rejected
    pub min_trials: usize,
    /// Maximum propagation depth from the initial failure
    pub max_depth: usize,
    /// Minutes between a parent failure and the failure it causes
    pub propagation_delay_minutes: u32,
    /// Fraction of the graph a trial must exceed to count as a cascade
    pub materiality_fraction: f64,
    /// Minimum failure membership for a node to be reported as affected
    pub affected_floor: f64,
    /// Base seed; `None` draws a fresh seed per call
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_trials: 200,
            min_trials: 20,
            max_depth: 5,
            propagation_delay_minutes: 5,
            materiality_fraction: 0.1,
            affected_floor: 0.05,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// With fixed base seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// With default trial count
    #[inline]
    #[must_use]
    pub fn with_default_trials(mut self, trials: usize) -> Self {
        self.default_trials = trials;
        self
    }

    /// With maximum propagation depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With materiality fraction
    #[inline]
    #[must_use]
    pub fn with_materiality_fraction(mut self, fraction: f64) -> Self {
        self.materiality_fraction = fraction.clamp(0.0, 1.0);
        self
    }
}

/// Pre-stabilization planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Strategies are produced only above this cascade probability
    pub trigger_probability: f64,
    /// Number of critical nodes targeted by the stabilization strategy
    pub top_k: usize,
    /// Number of top targets that also get backup activation
    pub backup_targets: usize,
    /// Load reduction proposed for critical nodes
    pub load_reduction_fraction: f64,
    /// Health added to targets in the what-if simulation
    pub health_boost: f64,
    /// Edges above this weight are strengthening candidates
    pub strengthening_weight_threshold: f64,
    /// Weight multiplier applied to strengthened edges
    pub strengthening_factor: f64,
    /// Trials per what-if simulation
    pub what_if_trials: usize,
    /// Retained strategy count
    pub max_strategies: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            trigger_probability: 0.7,
            top_k: 5,
            backup_targets: 2,
            load_reduction_fraction: 0.3,
            health_boost: 0.3,
            strengthening_weight_threshold: 0.5,
            strengthening_factor: 0.5,
            what_if_trials: 200,
            max_strategies: 50,
        }
    }
}

impl PlannerConfig {
    /// With trigger probability
    #[inline]
    #[must_use]
    pub fn with_trigger(mut self, probability: f64) -> Self {
        self.trigger_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// With top-K critical nodes
    #[inline]
    #[must_use]
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ForecastConfig::new();
        assert_eq!(config.simulation.default_trials, 200);
        assert_eq!(config.simulation.min_trials, 20);
        assert_eq!(config.simulation.max_depth, 5);
        assert_eq!(config.planner.trigger_probability, 0.7);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: ForecastConfig = toml::from_str(
            r#"
            [simulation]
            default_trials = 500
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.simulation.default_trials, 500);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.min_trials, 20);
        assert_eq!(config.planner, PlannerConfig::default());
    }
}
