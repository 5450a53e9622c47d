//! Critical-node analysis
//!
//! Scores every node of a snapshot on three axes and combines them into a
//! stabilization priority:
//!
//! - centrality: criticality of neighbours, dependents weighted 0.5 and
//!   dependencies 0.3, averaged over degree
//! - cascade contribution: depth-discounted reach along dependent edges
//! - vulnerability: `(1 - health) * (1 - redundancy / 5) * criticality`

use crate::graph::GraphSnapshot;
use crate::types::NodeId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DEPENDENT_WEIGHT: f64 = 0.5;
const DEPENDENCY_WEIGHT: f64 = 0.3;
const CONTRIBUTION_MAX_DEPTH: usize = 5;
const CONTRIBUTION_SCALE: f64 = 10.0;

/// Follow-up recommended for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Vulnerability above 0.7
    IncreaseRedundancy,
    /// Centrality above 0.8
    EnhanceMonitoring,
    /// Cascade contribution above 0.7
    PreStabilization,
}

impl RecommendedAction {
    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::IncreaseRedundancy => "increase_redundancy",
            RecommendedAction::EnhanceMonitoring => "enhance_monitoring",
            RecommendedAction::PreStabilization => "pre_stabilization",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalNodeAnalysis {
    /// Analyzed node
    pub node_id: NodeId,
    /// Neighbour criticality per connection, [0, 1]
    pub centrality_score: f64,
    /// Reach along dependent edges, [0, 1]
    pub cascade_contribution_score: f64,
    /// Exposure to failure, [0, 1]
    pub vulnerability_score: f64,
    /// Combined ranking score
    pub stabilization_priority: f64,
    /// Suggested follow-ups
    pub recommended_actions: Vec<RecommendedAction>,
}

/// Stateless analyzer over graph snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticalNodeAnalyzer;

impl CriticalNodeAnalyzer {
    /// Create analyzer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Analyze every node
    #[must_use]
    pub fn analyze(&self, snapshot: &GraphSnapshot) -> BTreeMap<NodeId, CriticalNodeAnalysis> {
        (0..snapshot.node_count())
            .into_par_iter()
            .map(|idx| self.analyze_node(snapshot, idx))
            .map(|a| (a.node_id.clone(), a))
            .collect()
    }

    /// Analyses sorted by descending priority, ties by id
    #[must_use]
    pub fn rank(&self, snapshot: &GraphSnapshot, limit: usize) -> Vec<CriticalNodeAnalysis> {
        let mut ranked: Vec<CriticalNodeAnalysis> = self.analyze(snapshot).into_values().collect();
        sort_by_priority(&mut ranked);
        ranked.truncate(limit);
        ranked
    }

    /// Analyze the node at dense index `idx`
    #[must_use]
    pub fn analyze_node(&self, snapshot: &GraphSnapshot, idx: usize) -> CriticalNodeAnalysis {
        let node = snapshot.node_at(idx);
        let centrality_score = centrality(snapshot, idx);
        let cascade_contribution_score = cascade_contribution(snapshot, idx);
        let vulnerability_score = (1.0 - node.health_score)
            * (1.0 - node.redundancy_fraction())
            * node.criticality_score;
        let stabilization_priority =
            0.4 * centrality_score + 0.4 * cascade_contribution_score + 0.2 * vulnerability_score;

        let mut recommended_actions = Vec::new();
        if vulnerability_score > 0.7 {
            recommended_actions.push(RecommendedAction::IncreaseRedundancy);
        }
        if centrality_score > 0.8 {
            recommended_actions.push(RecommendedAction::EnhanceMonitoring);
        }
        if cascade_contribution_score > 0.7 {
            recommended_actions.push(RecommendedAction::PreStabilization);
        }

        CriticalNodeAnalysis {
            node_id: node.node_id.clone(),
            centrality_score,
            cascade_contribution_score,
            vulnerability_score,
            stabilization_priority,
            recommended_actions,
        }
    }
}

/// Sort analyses by descending priority, ties by id
pub fn sort_by_priority(analyses: &mut [CriticalNodeAnalysis]) {
    analyses.sort_by(|a, b| {
        b.stabilization_priority
            .total_cmp(&a.stabilization_priority)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

/// Neighbour-criticality centrality of node `idx`
#[must_use]
pub fn centrality(snapshot: &GraphSnapshot, idx: usize) -> f64 {
    let mut score = 0.0;
    let mut degree = 0usize;
    for (t, _) in snapshot.outgoing(idx) {
        score += snapshot.node_at(t).criticality_score * DEPENDENT_WEIGHT;
        degree += 1;
    }
    for (s, _) in snapshot.incoming(idx) {
        score += snapshot.node_at(s).criticality_score * DEPENDENCY_WEIGHT;
        degree += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let normalized = score / degree.max(1) as f64;
    normalized.min(1.0)
}

/// Cascade contribution of node `idx`, in [0, 1]
#[must_use]
pub fn cascade_contribution(snapshot: &GraphSnapshot, idx: usize) -> f64 {
    let mut visited = vec![false; snapshot.node_count()];
    (contribution_dfs(snapshot, idx, 0, &mut visited) / CONTRIBUTION_SCALE).min(1.0)
}

// Visited set is shared across the whole walk, so each node contributes once.
fn contribution_dfs(
    snapshot: &GraphSnapshot,
    idx: usize,
    depth: usize,
    visited: &mut [bool],
) -> f64 {
    if visited[idx] || depth > CONTRIBUTION_MAX_DEPTH {
        return 0.0;
    }
    visited[idx] = true;

    #[allow(clippy::cast_precision_loss)]
    let decay = 1.0 - 0.1 * depth as f64;
    let mut total = 0.0;
    for (target, edge) in snapshot.outgoing(idx) {
        let weight = edge.failure_propagation_weight;
        total += weight * decay;
        total += contribution_dfs(snapshot, target, depth + 1, visited) * weight * 0.5;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::types::{DependencyEdge, InfrastructureNode, NodeCategory};

    fn star() -> GraphSnapshot {
        let graph = DependencyGraph::new();
        graph
            .add_node(
                InfrastructureNode::new("hub", NodeCategory::PowerGrid)
                    .with_criticality(0.9)
                    .with_health(0.2),
            )
            .unwrap();
        for id in ["x", "y"] {
            graph
                .add_node(InfrastructureNode::new(id, NodeCategory::Hospital).with_criticality(0.8))
                .unwrap();
            graph
                .add_edge(DependencyEdge::new("hub", id, "power_supply", 1.0))
                .unwrap();
        }
        graph.snapshot()
    }

    #[test]
    fn centrality_averages_neighbours() {
        let snapshot = star();
        let hub = snapshot.index_of(&"hub".into()).unwrap();
        assert!((centrality(&snapshot, hub) - 0.4).abs() < 1e-12);

        let x = snapshot.index_of(&"x".into()).unwrap();
        assert!((centrality(&snapshot, x) - 0.27).abs() < 1e-12);
    }

    #[test]
    fn contribution_counts_direct_edges() {
        let snapshot = star();
        let hub = snapshot.index_of(&"hub".into()).unwrap();
        // Two leaves at depth 0: 1.0 + 1.0, scaled by 10
        assert!((cascade_contribution(&snapshot, hub) - 0.2).abs() < 1e-12);

        let leaf = snapshot.index_of(&"y".into()).unwrap();
        assert_eq!(cascade_contribution(&snapshot, leaf), 0.0);
    }

    #[test]
    fn contribution_terminates_on_cycles() {
        let graph = DependencyGraph::new();
        for id in ["a", "b"] {
            graph
                .add_node(InfrastructureNode::new(id, NodeCategory::WaterSystem))
                .unwrap();
        }
        graph.add_edge(DependencyEdge::new("a", "b", "x", 1.0)).unwrap();
        graph.add_edge(DependencyEdge::new("b", "a", "x", 1.0)).unwrap();

        let snapshot = graph.snapshot();
        // a: 1.0 + dfs(b, 1) * 0.5 where dfs(b, 1) = 0.9 + dfs(a) (visited) = 0.9
        let a = snapshot.index_of(&"a".into()).unwrap();
        assert!((cascade_contribution(&snapshot, a) - 0.145).abs() < 1e-12);
    }

    #[test]
    fn priority_and_recommendations() {
        let snapshot = star();
        let analyses = CriticalNodeAnalyzer::new().analyze(&snapshot);
        let hub = &analyses[&NodeId::from("hub")];

        let vulnerability = 0.8 * 1.0 * 0.9;
        assert!((hub.vulnerability_score - vulnerability).abs() < 1e-12);
        assert!(
            (hub.stabilization_priority - (0.4 * 0.4 + 0.4 * 0.2 + 0.2 * vulnerability)).abs()
                < 1e-12
        );
        assert_eq!(
            hub.recommended_actions,
            vec![RecommendedAction::IncreaseRedundancy]
        );
    }

    #[test]
    fn rank_orders_and_limits() {
        let snapshot = star();
        let ranked = CriticalNodeAnalyzer::new().rank(&snapshot, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].node_id.as_str(), "hub");
        assert_eq!(ranked[1].node_id.as_str(), "x");
    }
}
