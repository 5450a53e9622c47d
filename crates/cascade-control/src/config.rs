//! Controller and engine configuration

use cascade_forecast::ForecastConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Risk monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Milliseconds between monitor ticks
    pub interval_ms: u64,
    /// Telemetry sample timeout in milliseconds
    pub telemetry_timeout_ms: u64,
    /// Dependents reached by edges at least this heavy join `affected_nodes`
    pub coupling_weight: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            telemetry_timeout_ms: 5_000,
            coupling_weight: 0.5,
        }
    }
}

impl MonitorConfig {
    /// Tick interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Telemetry timeout
    #[inline]
    #[must_use]
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    /// With tick interval
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = millis(interval);
        self
    }
}

/// Stabilization loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Agent deployment timeout in milliseconds
    pub deploy_timeout_ms: u64,
    /// Per-action actuation timeout in milliseconds
    pub actuation_timeout_ms: u64,
    /// Evaluation telemetry timeout in milliseconds
    pub telemetry_timeout_ms: u64,
    /// Wait between control and evaluation in milliseconds
    pub settle_ms: u64,
    /// Completed loops retained
    pub completed_history: usize,
    /// Effectiveness at or above this is `Stable`
    pub stable_threshold: f64,
    /// Effectiveness at or above this is `Recovering`
    pub recovering_threshold: f64,
    /// Reference recovery rate in nodes per minute
    pub recovery_speed_reference: f64,
    /// Health above which an affected node counts as recovered
    pub recovered_health: f64,
    /// Trials for baseline and post-action simulations
    pub evaluation_trials: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            deploy_timeout_ms: 10_000,
            actuation_timeout_ms: 10_000,
            telemetry_timeout_ms: 5_000,
            settle_ms: 2_000,
            completed_history: 100,
            stable_threshold: 0.7,
            recovering_threshold: 0.5,
            recovery_speed_reference: 0.5,
            recovered_health: 0.8,
            evaluation_trials: 200,
        }
    }
}

impl ControlConfig {
    /// Deployment timeout
    #[inline]
    #[must_use]
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    /// Actuation timeout
    #[inline]
    #[must_use]
    pub fn actuation_timeout(&self) -> Duration {
        Duration::from_millis(self.actuation_timeout_ms)
    }

    /// Evaluation telemetry timeout
    #[inline]
    #[must_use]
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    /// Settle time
    #[inline]
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// With deployment and actuation timeouts
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, deploy: Duration, actuation: Duration) -> Self {
        self.deploy_timeout_ms = millis(deploy);
        self.actuation_timeout_ms = millis(actuation);
        self
    }

    /// With settle time
    #[inline]
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_ms = millis(settle);
        self
    }

    /// With evaluation trial count
    #[inline]
    #[must_use]
    pub fn with_evaluation_trials(mut self, trials: usize) -> Self {
        self.evaluation_trials = trials;
        self
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulation and planning
    pub forecast: ForecastConfig,
    /// Risk monitor
    pub monitor: MonitorConfig,
    /// Stabilization loops
    pub control: ControlConfig,
    /// Predictions retained
    pub prediction_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            forecast: ForecastConfig::default(),
            monitor: MonitorConfig::default(),
            control: ControlConfig::default(),
            prediction_history: 100,
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With forecast settings
    #[inline]
    #[must_use]
    pub fn with_forecast(mut self, forecast: ForecastConfig) -> Self {
        self.forecast = forecast;
        self
    }

    /// With monitor settings
    #[inline]
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// With loop settings
    #[inline]
    #[must_use]
    pub fn with_control(mut self, control: ControlConfig) -> Self {
        self.control = control;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
