//! Monte-Carlo cascade simulator
//!
//! Each trial fails the start node at minute zero and runs a depth-bounded
//! BFS over dependent edges. A dependent fails with probability
//!
//! ```text
//! p = weight * (1 - health) * (1 - redundancy / 5) * mode_multiplier
//! ```
//!
//! clamped to `[0, 1]`, using one draw per edge. Visited state is per trial,
//! so cycles in the dependency graph terminate.
//!
//! Trials run on rayon over an immutable [`GraphSnapshot`]. Trial `i` seeds
//! its own RNG from `(base_seed, i)`, so a fixed base seed reproduces the
//! same prediction regardless of thread scheduling.

use crate::config::SimulationConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::graph::{DependencyGraph, GraphSnapshot};
use crate::types::{DependencyEdge, FailureMode, InfrastructureNode, NodeId, PredictionId};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Two-sided 95% normal quantile
const Z_95: f64 = 1.96;

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// One failure in a cascade timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    /// Minutes after the initial failure
    pub minute: u32,
    /// Failed node
    pub node_id: NodeId,
    /// Node whose failure caused this one, `None` for the initial failure
    pub caused_by: Option<NodeId>,
    /// Dependency type of the causing edge
    pub dependency_type: Option<String>,
}

/// Aggregated result of a Monte-Carlo cascade simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadePrediction {
    /// Unique id
    pub prediction_id: PredictionId,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Node failed at minute zero
    pub initial_failure_node: NodeId,
    /// How the initial node failed
    pub failure_mode: FailureMode,
    /// Number of trials aggregated
    pub trials: usize,
    /// Fraction of trials whose affected count exceeded the materiality threshold
    pub cascade_probability: f64,
    /// Fraction of trials in which each node failed (nodes that never failed are omitted)
    pub membership: BTreeMap<NodeId, f64>,
    /// Max distance from the start node to any node failed in the modal trial
    pub predicted_radius_km: f64,
    /// Start node plus nodes at or above the affected floor, by descending membership then id
    pub affected_nodes: Vec<NodeId>,
    /// Failure order of the modal trial
    pub cascade_timeline: Vec<FailureEvent>,
    /// Sum of affected nodes' criticality
    pub total_impact_score: f64,
    /// Confidence from trial count and variance
    pub confidence: f64,
}

impl CascadePrediction {
    /// Membership of a node, zero if it never failed
    #[must_use]
    pub fn membership_of(&self, node_id: &NodeId) -> f64 {
        self.membership.get(node_id).copied().unwrap_or(0.0)
    }

    /// Check whether a node is in the affected set
    #[must_use]
    pub fn is_affected(&self, node_id: &NodeId) -> bool {
        self.affected_nodes.iter().any(|n| n == node_id)
    }
}

#[derive(Debug)]
struct TrialEvent {
    minute: u32,
    node: usize,
    cause: Option<usize>,
}

#[derive(Debug)]
struct TrialOutcome {
    failed: Vec<usize>,
    events: Vec<TrialEvent>,
}

/// Probability that a failure propagates across `edge` into `target`
#[must_use]
pub fn propagation_probability(
    edge: &DependencyEdge,
    target: &InfrastructureNode,
    mode: FailureMode,
) -> f64 {
    let p = edge.failure_propagation_weight
        * (1.0 - target.health_score)
        * (1.0 - target.redundancy_fraction())
        * mode.multiplier(target.category);
    p.clamp(0.0, 1.0)
}

/// Half-width based confidence for a Bernoulli estimate
#[must_use]
pub fn estimate_confidence(probability: f64, trials: usize) -> f64 {
    if trials == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = trials as f64;
    let half_width = Z_95 * (probability * (1.0 - probability) / n).sqrt();
    1.0 - (2.0 * half_width).min(1.0)
}

/// Monte-Carlo cascade simulator
#[derive(Debug, Clone, Default)]
pub struct CascadeSimulator {
    config: SimulationConfig,
}

impl CascadeSimulator {
    /// Create simulator
    #[inline]
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulate a failure against the live graph
    ///
    /// `trials` defaults to the configured trial count.
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if `start` is not in the graph
    /// - `ForecastError::InsufficientTrials` below the configured minimum
    pub fn simulate(
        &self,
        graph: &DependencyGraph,
        start: &NodeId,
        mode: FailureMode,
        trials: Option<usize>,
    ) -> ForecastResult<CascadePrediction> {
        self.simulate_snapshot(&graph.snapshot(), start, mode, trials)
    }

    /// Simulate a failure against a snapshot with the configured seed
    ///
    /// # Errors
    /// Same as [`CascadeSimulator::simulate`].
    pub fn simulate_snapshot(
        &self,
        snapshot: &GraphSnapshot,
        start: &NodeId,
        mode: FailureMode,
        trials: Option<usize>,
    ) -> ForecastResult<CascadePrediction> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        self.simulate_seeded(snapshot, start, mode, trials, seed)
    }

    /// Simulate with an explicit base seed
    ///
    /// Used for what-if comparisons that must share random numbers with a
    /// baseline run.
    ///
    /// # Errors
    /// Same as [`CascadeSimulator::simulate`].
    #[tracing::instrument(skip_all, fields(start = %start, mode = %mode, trials))]
    pub fn simulate_seeded(
        &self,
        snapshot: &GraphSnapshot,
        start: &NodeId,
        mode: FailureMode,
        trials: Option<usize>,
        seed: u64,
    ) -> ForecastResult<CascadePrediction> {
        let trials = trials.unwrap_or(self.config.default_trials);
        tracing::Span::current().record("trials", trials);
        if trials < self.config.min_trials {
            return Err(ForecastError::InsufficientTrials {
                requested: trials,
                minimum: self.config.min_trials,
            });
        }
        let start_idx = snapshot
            .index_of(start)
            .ok_or_else(|| ForecastError::NodeNotFound(start.clone()))?;

        let outcomes: Vec<TrialOutcome> = (0..trials)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(trial_seed(seed, i));
                self.run_trial(snapshot, start_idx, mode, &mut rng)
            })
            .collect();

        let prediction = self.aggregate(snapshot, start_idx, mode, &outcomes);
        tracing::debug!(
            trials,
            probability = prediction.cascade_probability,
            affected = prediction.affected_nodes.len(),
            "cascade simulated"
        );
        Ok(prediction)
    }

    /// Materiality threshold for a graph of `node_count` nodes
    #[must_use]
    pub fn materiality_threshold(&self, node_count: usize) -> usize {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let scaled = (self.config.materiality_fraction * node_count as f64).ceil() as usize;
        scaled.max(1)
    }

    fn run_trial(
        &self,
        snapshot: &GraphSnapshot,
        start: usize,
        mode: FailureMode,
        rng: &mut StdRng,
    ) -> TrialOutcome {
        let mut visited = vec![false; snapshot.node_count()];
        let mut failed = vec![start];
        let mut events = vec![TrialEvent {
            minute: 0,
            node: start,
            cause: None,
        }];
        let mut queue = VecDeque::from([(start, 0usize, 0u32)]);
        visited[start] = true;

        while let Some((idx, depth, minute)) = queue.pop_front() {
            if depth >= self.config.max_depth {
                continue;
            }
            for (target, edge) in snapshot.outgoing(idx) {
                if visited[target] {
                    continue;
                }
                let p = propagation_probability(edge, snapshot.node_at(target), mode);
                if rng.random::<f64>() < p {
                    let at = minute + self.config.propagation_delay_minutes;
                    visited[target] = true;
                    failed.push(target);
                    events.push(TrialEvent {
                        minute: at,
                        node: target,
                        cause: Some(idx),
                    });
                    queue.push_back((target, depth + 1, at));
                }
            }
        }

        failed.sort_unstable();
        TrialOutcome { failed, events }
    }

    #[allow(clippy::cast_precision_loss)]
    fn aggregate(
        &self,
        snapshot: &GraphSnapshot,
        start: usize,
        mode: FailureMode,
        outcomes: &[TrialOutcome],
    ) -> CascadePrediction {
        let n = outcomes.len() as f64;
        let threshold = self.materiality_threshold(snapshot.node_count());

        let mut counts = vec![0usize; snapshot.node_count()];
        let mut cascades = 0usize;
        let mut sets: HashMap<&[usize], (usize, usize)> = HashMap::new();
        for (i, outcome) in outcomes.iter().enumerate() {
            for &idx in &outcome.failed {
                counts[idx] += 1;
            }
            if outcome.failed.len() > threshold {
                cascades += 1;
            }
            sets.entry(outcome.failed.as_slice())
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, i));
        }

        // Most frequent failed set, earliest trial on ties
        let modal = sets
            .values()
            .max_by(|(ca, fa), (cb, fb)| ca.cmp(cb).then(fb.cmp(fa)))
            .map_or(0, |(_, first)| *first);
        let modal = &outcomes[modal];

        let origin = snapshot.node_at(start).location;
        let predicted_radius_km = modal
            .failed
            .iter()
            .map(|&idx| origin.distance_km(&snapshot.node_at(idx).location))
            .fold(0.0, f64::max);

        let cascade_timeline = modal
            .events
            .iter()
            .map(|e| {
                let node_id = snapshot.node_at(e.node).node_id.clone();
                let (caused_by, dependency_type) = match e.cause {
                    Some(src) => {
                        let src_id = &snapshot.node_at(src).node_id;
                        let edge_type = snapshot
                            .edge(src_id, &node_id)
                            .map(|edge| edge.dependency_type.clone());
                        (Some(src_id.clone()), edge_type)
                    }
                    None => (None, None),
                };
                FailureEvent {
                    minute: e.minute,
                    node_id,
                    caused_by,
                    dependency_type,
                }
            })
            .collect();

        let membership: BTreeMap<NodeId, f64> = counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(idx, &c)| (snapshot.node_at(idx).node_id.clone(), c as f64 / n))
            .collect();

        let mut affected: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|&(idx, &c)| idx == start || c as f64 / n >= self.config.affected_floor)
            .map(|(idx, _)| idx)
            .collect();
        affected.sort_by(|&a, &b| {
            counts[b]
                .cmp(&counts[a])
                .then_with(|| snapshot.node_at(a).node_id.cmp(&snapshot.node_at(b).node_id))
        });

        let total_impact_score = affected
            .iter()
            .map(|&idx| snapshot.node_at(idx).criticality_score)
            .sum();
        let cascade_probability = cascades as f64 / n;

        CascadePrediction {
            prediction_id: PredictionId::new(),
            timestamp: Utc::now(),
            initial_failure_node: snapshot.node_at(start).node_id.clone(),
            failure_mode: mode,
            trials: outcomes.len(),
            cascade_probability,
            membership,
            predicted_radius_km,
            affected_nodes: affected
                .into_iter()
                .map(|idx| snapshot.node_at(idx).node_id.clone())
                .collect(),
            cascade_timeline,
            total_impact_score,
            confidence: estimate_confidence(cascade_probability, outcomes.len()),
        }
    }
}

fn trial_seed(base: u64, trial: usize) -> u64 {
    base ^ (trial as u64 + 1).wrapping_mul(SEED_STRIDE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeCategory;

    fn fragile(id: &str) -> InfrastructureNode {
        InfrastructureNode::new(id, NodeCategory::PowerGrid).with_health(0.0)
    }

    fn seeded() -> CascadeSimulator {
        CascadeSimulator::new(SimulationConfig::default().with_seed(11))
    }

    #[test]
    fn propagation_formula() {
        let edge = DependencyEdge::new("a", "b", "power_supply", 0.8);
        let target = InfrastructureNode::new("b", NodeCategory::PowerGrid)
            .with_health(0.5)
            .with_redundancy(1);
        let p = propagation_probability(&edge, &target, FailureMode::PowerOutage);
        assert!((p - 0.8 * 0.5 * 0.8 * 1.5).abs() < 1e-12);

        let saturated = propagation_probability(
            &DependencyEdge::new("a", "b", "x", 1.0),
            &fragile("b"),
            FailureMode::Overload,
        );
        assert_eq!(saturated, 1.0);
    }

    #[test]
    fn confidence_shrinks_with_variance() {
        assert_eq!(estimate_confidence(0.0, 100), 1.0);
        assert_eq!(estimate_confidence(1.0, 100), 1.0);
        assert!(estimate_confidence(0.5, 100) < estimate_confidence(0.5, 1000));
        assert_eq!(estimate_confidence(0.5, 0), 0.0);
    }

    #[test]
    fn materiality_threshold_floor() {
        let sim = CascadeSimulator::default();
        assert_eq!(sim.materiality_threshold(3), 1);
        assert_eq!(sim.materiality_threshold(18), 2);
        assert_eq!(sim.materiality_threshold(0), 1);
    }

    #[test]
    fn rejects_few_trials_and_unknown_nodes() {
        let graph = DependencyGraph::new();
        graph.add_node(fragile("a")).unwrap();
        let sim = seeded();

        assert!(matches!(
            sim.simulate(&graph, &"a".into(), FailureMode::Overload, Some(5)),
            Err(ForecastError::InsufficientTrials { requested: 5, minimum: 20 })
        ));
        assert!(matches!(
            sim.simulate(&graph, &"zz".into(), FailureMode::Overload, None),
            Err(ForecastError::NodeNotFound(_))
        ));
    }

    #[test]
    fn isolated_node_never_cascades() {
        let graph = DependencyGraph::new();
        graph.add_node(fragile("solo")).unwrap();

        let prediction = seeded()
            .simulate(&graph, &"solo".into(), FailureMode::EquipmentFailure, Some(50))
            .unwrap();
        assert_eq!(prediction.cascade_probability, 0.0);
        assert_eq!(prediction.affected_nodes, vec![NodeId::from("solo")]);
        assert_eq!(prediction.cascade_timeline.len(), 1);
        assert_eq!(prediction.predicted_radius_km, 0.0);
    }

    #[test]
    fn cycles_terminate() {
        let graph = DependencyGraph::new();
        for id in ["a", "b", "c"] {
            graph.add_node(fragile(id)).unwrap();
        }
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "a")] {
            graph
                .add_edge(DependencyEdge::new(s, t, "control_signals", 1.0))
                .unwrap();
        }

        let prediction = seeded()
            .simulate(&graph, &"a".into(), FailureMode::Overload, Some(20))
            .unwrap();
        assert_eq!(prediction.cascade_timeline.len(), 3);
        assert_eq!(prediction.cascade_timeline[2].minute, 10);
    }

    #[test]
    fn depth_bound_limits_chain() {
        let graph = DependencyGraph::new();
        let ids: Vec<String> = (0..10).map(|i| format!("n{i}")).collect();
        for id in &ids {
            graph.add_node(fragile(id)).unwrap();
        }
        for pair in ids.windows(2) {
            graph
                .add_edge(DependencyEdge::new(pair[0].as_str(), pair[1].as_str(), "x", 1.0))
                .unwrap();
        }

        let sim = CascadeSimulator::new(SimulationConfig::default().with_seed(1).with_max_depth(3));
        let prediction = sim
            .simulate(&graph, &"n0".into(), FailureMode::Overload, Some(20))
            .unwrap();
        assert_eq!(prediction.affected_nodes.len(), 4);
        assert!(!prediction.is_affected(&"n4".into()));
    }

    #[test]
    fn timeline_records_causes() {
        let graph = DependencyGraph::new();
        graph.add_node(fragile("a")).unwrap();
        graph.add_node(fragile("b")).unwrap();
        graph
            .add_edge(DependencyEdge::new("a", "b", "data_link", 1.0))
            .unwrap();

        let prediction = seeded()
            .simulate(&graph, &"a".into(), FailureMode::Overload, Some(20))
            .unwrap();
        let second = &prediction.cascade_timeline[1];
        assert_eq!(second.node_id.as_str(), "b");
        assert_eq!(second.caused_by.as_ref().map(NodeId::as_str), Some("a"));
        assert_eq!(second.dependency_type.as_deref(), Some("data_link"));
        assert_eq!(second.minute, 5);
    }
}
