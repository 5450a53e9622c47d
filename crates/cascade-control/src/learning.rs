//! Adaptive learning store
//!
//! Holds risk thresholds, effectiveness weights and a bounded outcome
//! history. Only completed loops write to it; the monitor and planner read
//! it. One instance is owned by the engine and shared through `Arc`.

use crate::types::{EffectivenessMetrics, LoopId, LoopStatus, RiskType};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default retained outcome count
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

const THRESHOLD_DECAY: f64 = 0.95;
const THRESHOLD_FLOOR: f64 = 0.2;
const WEIGHT_STEP: f64 = 0.1;

/// Effectiveness component weighted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectivenessComponent {
    /// Normalized risk reduction
    RiskReduction,
    /// Normalized recovery speed
    RecoverySpeed,
    /// Cascade containment success
    CascadeContainment,
}

impl EffectivenessComponent {
    /// Every component
    pub const ALL: [EffectivenessComponent; 3] = [
        EffectivenessComponent::RiskReduction,
        EffectivenessComponent::RecoverySpeed,
        EffectivenessComponent::CascadeContainment,
    ];
}

/// Weights of the effectiveness components, summing to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningWeights {
    /// Weight of normalized risk reduction
    pub risk_reduction: f64,
    /// Weight of normalized recovery speed
    pub recovery_speed: f64,
    /// Weight of cascade containment
    pub cascade_containment: f64,
}

impl Default for LearningWeights {
    fn default() -> Self {
        Self {
            risk_reduction: 0.4,
            recovery_speed: 0.3,
            cascade_containment: 0.3,
        }
    }
}

impl LearningWeights {
    /// Weight of one component
    #[must_use]
    pub fn get(&self, component: EffectivenessComponent) -> f64 {
        match component {
            EffectivenessComponent::RiskReduction => self.risk_reduction,
            EffectivenessComponent::RecoverySpeed => self.recovery_speed,
            EffectivenessComponent::CascadeContainment => self.cascade_containment,
        }
    }

    fn get_mut(&mut self, component: EffectivenessComponent) -> &mut f64 {
        match component {
            EffectivenessComponent::RiskReduction => &mut self.risk_reduction,
            EffectivenessComponent::RecoverySpeed => &mut self.recovery_speed,
            EffectivenessComponent::CascadeContainment => &mut self.cascade_containment,
        }
    }

    /// Weighted sum of normalized components
    #[must_use]
    pub fn combine(&self, risk_reduction: f64, recovery_speed: f64, containment: f64) -> f64 {
        self.risk_reduction * risk_reduction
            + self.recovery_speed * recovery_speed
            + self.cascade_containment * containment
    }

    fn normalize(&mut self) {
        let total = self.risk_reduction + self.recovery_speed + self.cascade_containment;
        if total > 0.0 {
            self.risk_reduction /= total;
            self.recovery_speed /= total;
            self.cascade_containment /= total;
        } else {
            *self = Self::default();
        }
    }
}

/// Detection threshold per risk type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Cascade probability estimate threshold
    pub cascade_probability: f64,
    /// Load ratio threshold
    pub infrastructure_overload: f64,
    /// Failure rate threshold
    pub failure_rate: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            cascade_probability: 0.7,
            infrastructure_overload: 0.85,
            failure_rate: 0.3,
        }
    }
}

impl RiskThresholds {
    /// Threshold for a risk type
    #[must_use]
    pub fn get(&self, risk_type: RiskType) -> f64 {
        match risk_type {
            RiskType::CascadeProbability => self.cascade_probability,
            RiskType::InfrastructureOverload => self.infrastructure_overload,
            RiskType::FailureRate => self.failure_rate,
        }
    }

    /// Replace threshold for a risk type
    pub fn set(&mut self, risk_type: RiskType, value: f64) {
        let value = value.clamp(0.0, 1.0);
        match risk_type {
            RiskType::CascadeProbability => self.cascade_probability = value,
            RiskType::InfrastructureOverload => self.infrastructure_overload = value,
            RiskType::FailureRate => self.failure_rate = value,
        }
    }
}

/// Finished loop as seen by the learning store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Loop that produced the outcome
    pub loop_id: LoopId,
    /// Detected risk type
    pub risk_type: RiskType,
    /// Detected risk level
    pub risk_level: f64,
    /// Measured effectiveness, absent if the loop failed before evaluation
    pub effectiveness: Option<EffectivenessMetrics>,
    /// Terminal status
    pub status: LoopStatus,
    /// Record time
    pub recorded_at: DateTime<Utc>,
}

/// Change applied by one recorded outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningUpdate {
    /// Threshold lowered after a highly effective response
    ThresholdAdjustment {
        /// Adjusted risk type
        risk_type: RiskType,
        /// Previous threshold
        old: f64,
        /// New threshold
        new: f64,
    },
    /// Weakest component reinforced after an ineffective response
    WeightAdjustment {
        /// Component whose weight was raised
        component: EffectivenessComponent,
        /// Weights before
        old: LearningWeights,
        /// Weights after renormalization
        new: LearningWeights,
    },
    /// Effective response recorded, no numeric change
    WeightReinforcement {
        /// Effectiveness that triggered it
        effectiveness: f64,
    },
}

/// Persistable store contents
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSnapshot {
    /// Thresholds
    pub thresholds: RiskThresholds,
    /// Weights
    pub weights: LearningWeights,
    /// Oldest first
    pub history: Vec<LoopOutcome>,
}

#[derive(Debug)]
struct LearningState {
    thresholds: RiskThresholds,
    weights: LearningWeights,
    history: VecDeque<LoopOutcome>,
}

/// Shared adaptive learning store
#[derive(Debug)]
pub struct AdaptiveLearningStore {
    state: RwLock<LearningState>,
    history_limit: usize,
}

impl Default for AdaptiveLearningStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveLearningStore {
    /// Create store with documented defaults
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create store with a custom history bound
    #[must_use]
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(LearningState {
                thresholds: RiskThresholds::default(),
                weights: LearningWeights::default(),
                history: VecDeque::new(),
            }),
            history_limit: history_limit.max(1),
        }
    }

    /// Restore from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: LearningSnapshot) -> Self {
        Self::from_snapshot_with_limit(snapshot, DEFAULT_HISTORY_LIMIT)
    }

    /// Restore from a snapshot, keeping at most `history_limit` outcomes
    ///
    /// Thresholds are clamped to `[0.2, 1]` and negative or non-finite
    /// weights count as zero before renormalizing.
    #[must_use]
    pub fn from_snapshot_with_limit(snapshot: LearningSnapshot, history_limit: usize) -> Self {
        let store = Self::with_history_limit(history_limit);
        {
            let mut state = store.state.write();
            for risk_type in RiskType::ALL {
                let value = snapshot.thresholds.get(risk_type);
                let value = if value.is_nan() { THRESHOLD_FLOOR } else { value };
                state
                    .thresholds
                    .set(risk_type, value.clamp(THRESHOLD_FLOOR, 1.0));
            }
            state.weights = snapshot.weights;
            for component in EffectivenessComponent::ALL {
                let weight = state.weights.get_mut(component);
                if !weight.is_finite() || *weight < 0.0 {
                    *weight = 0.0;
                }
            }
            state.weights.normalize();
            let skip = snapshot.history.len().saturating_sub(store.history_limit);
            state.history = snapshot.history.into_iter().skip(skip).collect();
        }
        store
    }

    /// Copy of the current contents
    #[must_use]
    pub fn snapshot(&self) -> LearningSnapshot {
        let state = self.state.read();
        LearningSnapshot {
            thresholds: state.thresholds,
            weights: state.weights,
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Current thresholds
    #[must_use]
    pub fn thresholds(&self) -> RiskThresholds {
        self.state.read().thresholds
    }

    /// Current weights
    #[must_use]
    pub fn weights(&self) -> LearningWeights {
        self.state.read().weights
    }

    /// Recorded outcomes, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<LoopOutcome> {
        self.state.read().history.iter().cloned().collect()
    }

    /// Mean overall effectiveness across evaluated outcomes
    #[must_use]
    pub fn average_effectiveness(&self) -> Option<f64> {
        let state = self.state.read();
        let scores: Vec<f64> = state
            .history
            .iter()
            .filter_map(|o| o.effectiveness.as_ref().map(|e| e.overall_effectiveness))
            .collect();
        if scores.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Some(mean)
    }

    /// Record a finished loop and adapt thresholds and weights
    ///
    /// Returns the updates applied, in application order.
    pub fn record_outcome(&self, outcome: LoopOutcome) -> Vec<LearningUpdate> {
        let mut state = self.state.write();
        let mut updates = Vec::new();

        if let Some(metrics) = &outcome.effectiveness {
            let score = metrics.overall_effectiveness;

            if score > 0.9 && outcome.risk_level > 0.8 {
                let old = state.thresholds.get(outcome.risk_type);
                let new = (old * THRESHOLD_DECAY).max(THRESHOLD_FLOOR);
                if (new - old).abs() > f64::EPSILON {
                    state.thresholds.set(outcome.risk_type, new);
                    updates.push(LearningUpdate::ThresholdAdjustment {
                        risk_type: outcome.risk_type,
                        old,
                        new,
                    });
                }
            }

            if score < 0.5 {
                let component = weakest_component(metrics);
                let old = state.weights;
                let weight = state.weights.get_mut(component);
                *weight = (*weight + WEIGHT_STEP).min(1.0);
                state.weights.normalize();
                updates.push(LearningUpdate::WeightAdjustment {
                    component,
                    old,
                    new: state.weights,
                });
            }

            if score > 0.8 {
                updates.push(LearningUpdate::WeightReinforcement {
                    effectiveness: score,
                });
            }
        }

        tracing::debug!(
            loop_id = %outcome.loop_id,
            status = %outcome.status,
            updates = updates.len(),
            "Recorded loop outcome"
        );

        state.history.push_back(outcome);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        updates
    }
}

/// Component with the lowest normalized score; ties go to the first listed
fn weakest_component(metrics: &EffectivenessMetrics) -> EffectivenessComponent {
    let candidates = [
        (
            EffectivenessComponent::RiskReduction,
            metrics.normalized_risk_reduction,
        ),
        (
            EffectivenessComponent::RecoverySpeed,
            metrics.normalized_recovery_speed,
        ),
        (
            EffectivenessComponent::CascadeContainment,
            metrics.cascade_containment_success,
        ),
    ];
    let mut weakest = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.1 < weakest.1 {
            weakest = *candidate;
        }
    }
    weakest.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(risk: f64, speed: f64, containment: f64) -> EffectivenessMetrics {
        let overall = LearningWeights::default().combine(risk, speed, containment);
        EffectivenessMetrics {
            risk_reduction_delta: risk,
            normalized_risk_reduction: risk,
            recovery_speed: speed * 0.5,
            normalized_recovery_speed: speed,
            cascade_containment_success: containment,
            overall_effectiveness: overall,
            baseline_cascade_probability: 0.0,
            post_cascade_probability: 1.0 - containment,
            measurement_window_secs: 2.0,
        }
    }

    fn outcome(risk_type: RiskType, level: f64, eff: Option<EffectivenessMetrics>) -> LoopOutcome {
        LoopOutcome {
            loop_id: LoopId::new(),
            risk_type,
            risk_level: level,
            effectiveness: eff,
            status: LoopStatus::Stable,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn effective_high_risk_lowers_threshold() {
        let store = AdaptiveLearningStore::new();
        let updates = store.record_outcome(outcome(
            RiskType::FailureRate,
            0.9,
            Some(metrics(1.0, 1.0, 0.95)),
        ));

        assert!((store.thresholds().failure_rate - 0.285).abs() < 1e-12);
        assert_eq!(store.thresholds().cascade_probability, 0.7);
        assert!(matches!(
            updates[0],
            LearningUpdate::ThresholdAdjustment { risk_type: RiskType::FailureRate, .. }
        ));
        assert!(matches!(
            updates[1],
            LearningUpdate::WeightReinforcement { .. }
        ));
    }

    #[test]
    fn threshold_never_drops_below_floor() {
        let store = AdaptiveLearningStore::new();
        for _ in 0..100 {
            store.record_outcome(outcome(
                RiskType::CascadeProbability,
                0.95,
                Some(metrics(1.0, 1.0, 1.0)),
            ));
        }
        assert!((store.thresholds().cascade_probability - THRESHOLD_FLOOR).abs() < 1e-12);
    }

    #[test]
    fn ineffective_outcome_reinforces_weakest_component() {
        let store = AdaptiveLearningStore::new();
        let updates = store.record_outcome(outcome(
            RiskType::InfrastructureOverload,
            0.9,
            Some(metrics(0.2, 0.1, 0.6)),
        ));

        let weights = store.weights();
        let sum = weights.risk_reduction + weights.recovery_speed + weights.cascade_containment;
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((weights.recovery_speed - 0.4 / 1.1).abs() < 1e-12);
        assert!(matches!(
            updates.as_slice(),
            [LearningUpdate::WeightAdjustment {
                component: EffectivenessComponent::RecoverySpeed,
                ..
            }]
        ));
    }

    #[test]
    fn unevaluated_outcome_only_records_history() {
        let store = AdaptiveLearningStore::with_history_limit(2);
        for _ in 0..3 {
            assert!(store
                .record_outcome(outcome(RiskType::FailureRate, 0.9, None))
                .is_empty());
        }
        assert_eq!(store.history().len(), 2);
        assert_eq!(store.thresholds(), RiskThresholds::default());
        assert_eq!(store.average_effectiveness(), None);
    }

    #[test]
    fn empty_snapshot_yields_defaults() {
        let snapshot: LearningSnapshot = serde_json::from_str("{}").unwrap();
        let store = AdaptiveLearningStore::from_snapshot(snapshot);
        assert_eq!(store.thresholds(), RiskThresholds::default());
        assert_eq!(store.weights(), LearningWeights::default());

        let partial: LearningSnapshot =
            serde_json::from_str(r#"{"thresholds":{"failure_rate":0.25}}"#).unwrap();
        let store = AdaptiveLearningStore::from_snapshot(partial);
        assert_eq!(store.thresholds().failure_rate, 0.25);
        assert_eq!(store.thresholds().infrastructure_overload, 0.85);
    }

    #[test]
    fn out_of_range_snapshot_is_sanitized() {
        let snapshot: LearningSnapshot = serde_json::from_str(
            r#"{
                "thresholds": {"cascade_probability": -0.4, "infrastructure_overload": 1.5, "failure_rate": 0.1},
                "weights": {"risk_reduction": -1.0, "recovery_speed": 1.0, "cascade_containment": 3.0}
            }"#,
        )
        .unwrap();
        let store = AdaptiveLearningStore::from_snapshot(snapshot);

        let thresholds = store.thresholds();
        assert_eq!(thresholds.cascade_probability, THRESHOLD_FLOOR);
        assert_eq!(thresholds.infrastructure_overload, 1.0);
        assert_eq!(thresholds.failure_rate, THRESHOLD_FLOOR);

        let weights = store.weights();
        assert_eq!(weights.risk_reduction, 0.0);
        assert!((weights.recovery_speed - 0.25).abs() < 1e-12);
        assert!((weights.cascade_containment - 0.75).abs() < 1e-12);
    }

    #[test]
    fn all_negative_weights_fall_back_to_defaults() {
        let snapshot: LearningSnapshot = serde_json::from_str(
            r#"{"weights": {"risk_reduction": -1.0, "recovery_speed": -2.0, "cascade_containment": -0.5}}"#,
        )
        .unwrap();
        let store = AdaptiveLearningStore::from_snapshot(snapshot);
        assert_eq!(store.weights(), LearningWeights::default());
    }

    #[test]
    fn restore_honours_history_limit() {
        let source = AdaptiveLearningStore::new();
        for _ in 0..5 {
            source.record_outcome(outcome(RiskType::FailureRate, 0.5, None));
        }
        let snapshot = source.snapshot();
        let newest = snapshot.history.last().map(|o| o.loop_id);

        let store = AdaptiveLearningStore::from_snapshot_with_limit(snapshot, 2);
        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|o| o.loop_id), newest);

        store.record_outcome(outcome(RiskType::FailureRate, 0.5, None));
        assert_eq!(store.history().len(), 2);
    }
}
