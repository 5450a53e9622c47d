//! Dependency graph store
//!
//! Topology lives in a petgraph `DiGraph` behind a `RwLock`; it only changes
//! when nodes or edges are added. Dynamic node state (health, load) lives in
//! a `DashMap`, so writes from telemetry ingestion and from stabilization
//! loops are serialized per node without blocking the rest of the graph.
//!
//! Simulation and analysis never read the live store directly: they work on
//! a [`GraphSnapshot`], an immutable copy with dense node indices.

use crate::error::{ForecastError, ForecastResult};
use crate::types::{DependencyEdge, InfrastructureNode, NodeId, MAX_REDUNDANCY};
use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Topology {
    graph: DiGraph<NodeId, DependencyEdge>,
    index: HashMap<NodeId, NodeIndex>,
}

/// Shared, concurrently mutable dependency graph
#[derive(Debug, Default)]
pub struct DependencyGraph {
    topology: RwLock<Topology>,
    nodes: DashMap<NodeId, InfrastructureNode>,
    revision: AtomicU64,
}

impl DependencyGraph {
    /// Create empty graph
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node
    ///
    /// Dependency lists on the incoming node are ignored; they are derived
    /// from edges added afterwards.
    ///
    /// # Errors
    /// - `ForecastError::DuplicateNode` if the id is already registered
    pub fn add_node(&self, mut node: InfrastructureNode) -> ForecastResult<()> {
        let mut topology = self.topology.write();
        if topology.index.contains_key(&node.node_id) {
            return Err(ForecastError::DuplicateNode(node.node_id));
        }

        node.normalize();
        node.dependencies.clear();
        node.dependents.clear();

        let idx = topology.graph.add_node(node.node_id.clone());
        topology.index.insert(node.node_id.clone(), idx);
        self.nodes.insert(node.node_id.clone(), node);
        self.bump();
        Ok(())
    }

    /// Register a directed dependency edge
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if either endpoint is missing
    /// - `ForecastError::SelfLoop` if source equals target
    /// - `ForecastError::DuplicateEdge` if the edge already exists
    pub fn add_edge(&self, mut edge: DependencyEdge) -> ForecastResult<()> {
        if edge.source_node == edge.target_node {
            return Err(ForecastError::SelfLoop(edge.source_node));
        }

        let mut topology = self.topology.write();
        let source = *topology
            .index
            .get(&edge.source_node)
            .ok_or_else(|| ForecastError::NodeNotFound(edge.source_node.clone()))?;
        let target = *topology
            .index
            .get(&edge.target_node)
            .ok_or_else(|| ForecastError::NodeNotFound(edge.target_node.clone()))?;

        if topology.graph.find_edge(source, target).is_some() {
            return Err(ForecastError::DuplicateEdge {
                source_node: edge.source_node,
                target_node: edge.target_node,
            });
        }

        edge.failure_propagation_weight = edge.failure_propagation_weight.clamp(0.0, 1.0);
        edge.recovery_dependency = edge.recovery_dependency.clamp(0.0, 1.0);

        if let Some(mut node) = self.nodes.get_mut(&edge.source_node) {
            node.dependents.push(edge.target_node.clone());
        }
        if let Some(mut node) = self.nodes.get_mut(&edge.target_node) {
            node.dependencies.push(edge.source_node.clone());
        }

        tracing::debug!(
            source = %edge.source_node,
            target = %edge.target_node,
            weight = edge.failure_propagation_weight,
            "dependency edge added"
        );
        topology.graph.add_edge(source, target, edge);
        self.bump();
        Ok(())
    }

    /// Check whether a node is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Copy of a node's current state
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<InfrastructureNode> {
        self.nodes.get(node_id).map(|n| n.clone())
    }

    /// Copy of an edge
    #[must_use]
    pub fn edge(&self, source: &NodeId, target: &NodeId) -> Option<DependencyEdge> {
        let topology = self.topology.read();
        let s = topology.index.get(source)?;
        let t = topology.index.get(target)?;
        topology
            .graph
            .find_edge(*s, *t)
            .map(|e| topology.graph[e].clone())
    }

    /// Nodes that depend on `node_id`, in insertion order
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the node is missing
    pub fn dependents(&self, node_id: &NodeId) -> ForecastResult<Vec<NodeId>> {
        self.nodes
            .get(node_id)
            .map(|n| n.dependents.clone())
            .ok_or_else(|| ForecastError::NodeNotFound(node_id.clone()))
    }

    /// Nodes that `node_id` depends on, in insertion order
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the node is missing
    pub fn dependencies(&self, node_id: &NodeId) -> ForecastResult<Vec<NodeId>> {
        self.nodes
            .get(node_id)
            .map(|n| n.dependencies.clone())
            .ok_or_else(|| ForecastError::NodeNotFound(node_id.clone()))
    }

    /// Overwrite a node's measured health and load
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the node is missing
    pub fn update_condition(
        &self,
        node_id: &NodeId,
        health_score: f64,
        current_load: f64,
    ) -> ForecastResult<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ForecastError::NodeNotFound(node_id.clone()))?;
        node.health_score = health_score.clamp(0.0, 1.0);
        node.current_load = current_load.max(0.0);
        drop(node);

        self.bump();
        Ok(())
    }

    /// Apply a control action's nominal effect to a node
    ///
    /// `load_relief` is the fraction of current load removed; redundancy is
    /// capped at the maximum level.
    ///
    /// # Errors
    /// - `ForecastError::NodeNotFound` if the node is missing
    pub fn apply_effect(
        &self,
        node_id: &NodeId,
        health_gain: f64,
        load_relief: f64,
        redundancy_gain: u8,
    ) -> ForecastResult<InfrastructureNode> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ForecastError::NodeNotFound(node_id.clone()))?;
        node.health_score = (node.health_score + health_gain).clamp(0.0, 1.0);
        node.current_load *= 1.0 - load_relief.clamp(0.0, 1.0);
        node.redundancy_level = node
            .redundancy_level
            .saturating_add(redundancy_gain)
            .min(MAX_REDUNDANCY);
        let updated = node.clone();
        drop(node);

        self.bump();
        Ok(updated)
    }

    /// All node ids, sorted
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Copies of all edges, in insertion order
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let topology = self.topology.read();
        topology.graph.edge_weights().cloned().collect()
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.topology.read().graph.node_count()
    }

    /// Number of edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.topology.read().graph.edge_count()
    }

    /// Monotone counter bumped by every mutation
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Immutable copy of the current graph
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        let topology = self.topology.read();
        let revision = self.revision();

        let nodes: Vec<InfrastructureNode> = topology
            .graph
            .node_weights()
            .filter_map(|id| self.nodes.get(id).map(|n| n.clone()))
            .collect();

        GraphSnapshot::build(topology.graph.clone(), topology.index.clone(), nodes, revision)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

/// Immutable graph copy with dense indices for simulation and analysis
///
/// Node `i` corresponds to petgraph `NodeIndex::new(i)`. Adjacency lists
/// preserve edge insertion order so traversals are deterministic.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    graph: DiGraph<NodeId, DependencyEdge>,
    index: HashMap<NodeId, NodeIndex>,
    nodes: Vec<InfrastructureNode>,
    outgoing: Vec<Vec<(usize, EdgeIndex)>>,
    incoming: Vec<Vec<(usize, EdgeIndex)>>,
    revision: u64,
}

impl GraphSnapshot {
    fn build(
        graph: DiGraph<NodeId, DependencyEdge>,
        index: HashMap<NodeId, NodeIndex>,
        nodes: Vec<InfrastructureNode>,
        revision: u64,
    ) -> Self {
        let n = graph.node_count();
        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        for edge in graph.edge_references() {
            let (s, t) = (edge.source().index(), edge.target().index());
            outgoing[s].push((t, edge.id()));
            incoming[t].push((s, edge.id()));
        }

        Self {
            graph,
            index,
            nodes,
            outgoing,
            incoming,
            revision,
        }
    }

    /// Store revision this snapshot was taken at
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Dense index of a node
    #[inline]
    #[must_use]
    pub fn index_of(&self, node_id: &NodeId) -> Option<usize> {
        self.index.get(node_id).map(|i| i.index())
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&InfrastructureNode> {
        self.index_of(node_id).map(|i| &self.nodes[i])
    }

    /// Node by dense index
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    #[inline]
    #[must_use]
    pub fn node_at(&self, idx: usize) -> &InfrastructureNode {
        &self.nodes[idx]
    }

    /// All nodes in index order
    pub fn nodes(&self) -> impl Iterator<Item = &InfrastructureNode> {
        self.nodes.iter()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.graph.edge_weights()
    }

    /// Edge between two nodes
    #[must_use]
    pub fn edge(&self, source: &NodeId, target: &NodeId) -> Option<&DependencyEdge> {
        let s = self.index.get(source)?;
        let t = self.index.get(target)?;
        self.graph.find_edge(*s, *t).map(|e| &self.graph[e])
    }

    /// Dependent edges of node `idx`: `(target index, edge)`
    pub fn outgoing(&self, idx: usize) -> impl Iterator<Item = (usize, &DependencyEdge)> {
        self.outgoing[idx]
            .iter()
            .map(move |(t, e)| (*t, &self.graph[*e]))
    }

    /// Dependency edges of node `idx`: `(source index, edge)`
    pub fn incoming(&self, idx: usize) -> impl Iterator<Item = (usize, &DependencyEdge)> {
        self.incoming[idx]
            .iter()
            .map(move |(s, e)| (*s, &self.graph[*e]))
    }

    /// Mutable node access for what-if experiments on the copy
    pub fn node_mut(&mut self, node_id: &NodeId) -> Option<&mut InfrastructureNode> {
        let idx = self.index_of(node_id)?;
        Some(&mut self.nodes[idx])
    }

    /// Scale an edge's propagation weight on the copy
    ///
    /// Returns `false` if the edge does not exist.
    pub fn scale_edge_weight(&mut self, source: &NodeId, target: &NodeId, factor: f64) -> bool {
        let (Some(s), Some(t)) = (self.index.get(source), self.index.get(target)) else {
            return false;
        };
        match self.graph.find_edge(*s, *t) {
            Some(e) => {
                let edge = &mut self.graph[e];
                edge.failure_propagation_weight =
                    (edge.failure_propagation_weight * factor).clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeCategory;

    fn node(id: &str) -> InfrastructureNode {
        InfrastructureNode::new(id, NodeCategory::PowerGrid)
    }

    fn two_node_graph() -> DependencyGraph {
        let graph = DependencyGraph::new();
        graph.add_node(node("a")).unwrap();
        graph.add_node(node("b")).unwrap();
        graph
            .add_edge(DependencyEdge::new("a", "b", "power_supply", 0.8))
            .unwrap();
        graph
    }

    #[test]
    fn add_edge_updates_adjacency() {
        let graph = two_node_graph();
        assert_eq!(graph.dependents(&"a".into()).unwrap(), vec![NodeId::from("b")]);
        assert_eq!(graph.dependencies(&"b".into()).unwrap(), vec![NodeId::from("a")]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn edge_requires_existing_endpoints() {
        let graph = two_node_graph();
        let result = graph.add_edge(DependencyEdge::new("a", "ghost", "data_link", 0.5));
        assert!(matches!(result, Err(ForecastError::NodeNotFound(id)) if id.as_str() == "ghost"));
    }

    #[test]
    fn rejects_self_loop_and_duplicates() {
        let graph = two_node_graph();
        assert!(matches!(
            graph.add_edge(DependencyEdge::new("a", "a", "x", 0.1)),
            Err(ForecastError::SelfLoop(_))
        ));
        assert!(matches!(
            graph.add_edge(DependencyEdge::new("a", "b", "x", 0.1)),
            Err(ForecastError::DuplicateEdge { .. })
        ));
        assert!(matches!(
            graph.add_node(node("a")),
            Err(ForecastError::DuplicateNode(_))
        ));
    }

    #[test]
    fn cycles_are_accepted() {
        let graph = two_node_graph();
        graph
            .add_edge(DependencyEdge::new("b", "a", "cooling_water", 0.6))
            .unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn revision_tracks_mutations() {
        let graph = two_node_graph();
        let before = graph.revision();
        graph.update_condition(&"a".into(), 0.4, 10.0).unwrap();
        assert!(graph.revision() > before);

        let a = graph.node(&"a".into()).unwrap();
        assert_eq!(a.health_score, 0.4);
    }

    #[test]
    fn apply_effect_is_bounded() {
        let graph = two_node_graph();
        graph.update_condition(&"b".into(), 0.9, 80.0).unwrap();

        let updated = graph.apply_effect(&"b".into(), 0.5, 0.25, 9).unwrap();
        assert_eq!(updated.health_score, 1.0);
        assert!((updated.current_load - 60.0).abs() < 1e-9);
        assert_eq!(updated.redundancy_level, MAX_REDUNDANCY);
    }

    #[test]
    fn snapshot_is_detached() {
        let graph = two_node_graph();
        let mut snapshot = graph.snapshot();

        snapshot.node_mut(&"a".into()).unwrap().health_score = 0.1;
        assert!(snapshot.scale_edge_weight(&"a".into(), &"b".into(), 0.5));

        assert_eq!(graph.node(&"a".into()).unwrap().health_score, 1.0);
        let live = graph.edge(&"a".into(), &"b".into()).unwrap();
        assert!((live.failure_propagation_weight - 0.8).abs() < 1e-12);

        let copy = snapshot.edge(&"a".into(), &"b".into()).unwrap();
        assert!((copy.failure_propagation_weight - 0.4).abs() < 1e-12);
    }

    #[test]
    fn snapshot_adjacency_preserves_order() {
        let graph = DependencyGraph::new();
        for id in ["hub", "x", "y", "z"] {
            graph.add_node(node(id)).unwrap();
        }
        for id in ["z", "x", "y"] {
            graph
                .add_edge(DependencyEdge::new("hub", id, "power_supply", 0.5))
                .unwrap();
        }

        let snapshot = graph.snapshot();
        let hub = snapshot.index_of(&"hub".into()).unwrap();
        let order: Vec<&str> = snapshot
            .outgoing(hub)
            .map(|(t, _)| snapshot.node_at(t).node_id.as_str())
            .collect();
        assert_eq!(order, vec!["z", "x", "y"]);
    }
}
