use cascade_control::phase::{allowed_transitions, validate_transition};
use cascade_control::{ActionCatalog, LoopPhase, RiskDetection, RiskType};
use cascade_forecast::NodeId;
use cascade_test_utils::metro_graph;
use proptest::prelude::*;

fn phase() -> impl Strategy<Value = LoopPhase> {
    prop::sample::select(LoopPhase::ALL.to_vec())
}

fn risk_type() -> impl Strategy<Value = RiskType> {
    prop::sample::select(RiskType::ALL.to_vec())
}

proptest! {
    #[test]
    fn walks_never_leave_terminal_phases(steps in prop::collection::vec(phase(), 1..40)) {
        let mut current = LoopPhase::RiskDetected;
        for next in steps {
            let was_terminal = current.is_terminal();
            match validate_transition(current, next) {
                Ok(()) => {
                    prop_assert!(!was_terminal);
                    prop_assert!(allowed_transitions(current).contains(&next));
                    current = next;
                }
                Err(_) => prop_assert!(!allowed_transitions(current).contains(&next)),
            }
        }
    }

    #[test]
    fn every_live_phase_can_fail(from in phase()) {
        if !from.is_terminal() {
            prop_assert!(validate_transition(from, LoopPhase::Failed).is_ok());
        }
    }

    #[test]
    fn intents_target_existing_nodes(
        target in 0usize..18,
        risk_type in risk_type(),
        level in 0.0f64..=1.0,
        extra in prop::collection::vec(0usize..24, 0..6),
    ) {
        let graph = metro_graph();
        let snapshot = graph.snapshot();
        let target_id = snapshot.node_at(target).node_id.clone();

        // Indices past the graph become unknown node ids
        let affected: Vec<NodeId> = extra
            .iter()
            .map(|&i| {
                if i < snapshot.node_count() {
                    snapshot.node_at(i).node_id.clone()
                } else {
                    NodeId::new(format!("unknown_{i}"))
                }
            })
            .collect();
        let detection = RiskDetection::new(target_id.clone(), risk_type, level, 0.0)
            .with_affected(affected);

        let intent = ActionCatalog::standard()
            .build_intent(&detection, &snapshot, None)
            .unwrap();

        prop_assert!(!intent.actions.is_empty());
        for action in &intent.actions {
            prop_assert!(!action.target_nodes.is_empty());
            for node in &action.target_nodes {
                prop_assert!(snapshot.node(node).is_some(), "unknown target {}", node);
            }
        }
        prop_assert!(intent.actions.windows(2).all(|w| w[0].priority <= w[1].priority));
        prop_assert!(intent.success_probability >= 0.7 && intent.success_probability <= 0.95);
        prop_assert!(matches!(intent.execution_priority, 1 | 2));
        prop_assert_eq!(intent.source_detection, detection.detection_id);
        prop_assert!(intent.resource_requirements.contains_key("monitoring_agents"));
    }
}
