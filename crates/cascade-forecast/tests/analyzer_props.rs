use cascade_forecast::{
    CriticalNodeAnalyzer, DependencyEdge, DependencyGraph, InfrastructureNode, NodeCategory,
    NodeId, TopologySpec,
};
use proptest::prelude::*;

fn graph_with_hub(hub_health: f64, hub_redundancy: u8, criticality: f64) -> DependencyGraph {
    let graph = DependencyGraph::new();
    graph
        .add_node(
            InfrastructureNode::new("hub", NodeCategory::PowerGrid)
                .with_health(hub_health)
                .with_redundancy(hub_redundancy)
                .with_criticality(criticality),
        )
        .unwrap();
    for (id, weight) in [("left", 0.7), ("right", 0.4)] {
        graph
            .add_node(InfrastructureNode::new(id, NodeCategory::Hospital).with_criticality(0.9))
            .unwrap();
        graph
            .add_edge(DependencyEdge::new("hub", id, "power_supply", weight))
            .unwrap();
    }
    graph
}

#[test]
fn test_metro_ranking_is_sorted() {
    let spec = TopologySpec::metro_reference().unwrap();
    let graph = DependencyGraph::from_topology(&spec).unwrap();
    let ranked = CriticalNodeAnalyzer::new().rank(&graph.snapshot(), 5);

    assert_eq!(ranked.len(), 5);
    for pair in ranked.windows(2) {
        assert!(pair[0].stabilization_priority >= pair[1].stabilization_priority);
    }
    for analysis in &ranked {
        assert!((0.0..=1.0).contains(&analysis.centrality_score));
        assert!((0.0..=1.0).contains(&analysis.cascade_contribution_score));
    }
}

proptest! {
    #[test]
    fn prop_priority_monotone_in_vulnerability(
        h1 in 0.0..=1.0f64,
        h2 in 0.0..=1.0f64,
        redundancy in 0u8..=5,
        criticality in 0.0..=1.0f64,
    ) {
        let analyzer = CriticalNodeAnalyzer::new();
        let hub = NodeId::from("hub");

        let a = analyzer.analyze(&graph_with_hub(h1, redundancy, criticality).snapshot());
        let b = analyzer.analyze(&graph_with_hub(h2, redundancy, criticality).snapshot());
        let (a, b) = (&a[&hub], &b[&hub]);

        if a.vulnerability_score <= b.vulnerability_score {
            prop_assert!(a.stabilization_priority <= b.stabilization_priority + 1e-12);
        } else {
            prop_assert!(b.stabilization_priority <= a.stabilization_priority + 1e-12);
        }
    }
}
