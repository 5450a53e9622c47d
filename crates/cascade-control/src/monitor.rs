//! Risk monitor
//!
//! Each tick samples telemetry, folds it into the dependency graph and
//! evaluates every node that has no active loop against the learning
//! store's thresholds. Estimates here are analytic; Monte Carlo runs only
//! inside loops and on explicit prediction requests.

use crate::collaborators::{TelemetryFrame, TelemetrySource};
use crate::config::MonitorConfig;
use crate::learning::{AdaptiveLearningStore, RiskThresholds};
use crate::types::{RiskDetection, RiskType};
use cascade_forecast::analyzer::cascade_contribution;
use cascade_forecast::{DependencyGraph, ForecastError, GraphSnapshot, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Analytic risk levels of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessed node
    pub node_id: NodeId,
    /// Analytic cascade probability estimate
    pub cascade_probability: f64,
    /// Load over capacity, clamped to [0, 1]
    pub overload: f64,
    /// One minus health
    pub failure_rate: f64,
    /// Static criticality, carried for risk factors
    pub criticality: f64,
}

impl RiskAssessment {
    /// Level of one risk signal
    #[must_use]
    pub fn level(&self, risk_type: RiskType) -> f64 {
        match risk_type {
            RiskType::CascadeProbability => self.cascade_probability,
            RiskType::InfrastructureOverload => self.overload,
            RiskType::FailureRate => self.failure_rate,
        }
    }

    /// Signal with the largest exceedance above its threshold
    ///
    /// Ties go to the first type in evaluation order.
    #[must_use]
    pub fn worst_exceedance(&self, thresholds: &RiskThresholds) -> Option<RiskType> {
        let mut worst: Option<(RiskType, f64)> = None;
        for risk_type in RiskType::ALL {
            let excess = self.level(risk_type) - thresholds.get(risk_type);
            if excess <= 0.0 {
                continue;
            }
            match worst {
                Some((_, w)) if w >= excess => {}
                _ => worst = Some((risk_type, excess)),
            }
        }
        worst.map(|(risk_type, _)| risk_type)
    }
}

/// Assess the node at dense index `idx`
#[must_use]
pub fn assess_node(snapshot: &GraphSnapshot, idx: usize) -> RiskAssessment {
    let node = snapshot.node_at(idx);
    let load_ratio = node.load_ratio();
    let failure_rate = 1.0 - node.health_score;
    let cascade_probability = (0.6 * failure_rate * load_ratio * node.criticality_score
        + 0.4 * cascade_contribution(snapshot, idx))
    .min(1.0);

    RiskAssessment {
        node_id: node.node_id.clone(),
        cascade_probability,
        overload: load_ratio.clamp(0.0, 1.0),
        failure_rate,
        criticality: node.criticality_score,
    }
}

/// Coarse risk label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    /// At most 0.4
    Low,
    /// Above 0.4
    Medium,
    /// Above 0.6
    High,
    /// Above 0.8
    Critical,
}

impl RiskLabel {
    /// Label for a probability
    #[must_use]
    pub fn from_probability(p: f64) -> Self {
        if p > 0.8 {
            RiskLabel::Critical
        } else if p > 0.6 {
            RiskLabel::High
        } else if p > 0.4 {
            RiskLabel::Medium
        } else {
            RiskLabel::Low
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLabel::Low => "low",
            RiskLabel::Medium => "medium",
            RiskLabel::High => "high",
            RiskLabel::Critical => "critical",
        })
    }
}

/// Estimate and label of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRisk {
    /// Analytic cascade probability estimate
    pub probability: f64,
    /// Label of the estimate
    pub label: RiskLabel,
}

/// Live risk overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeRisk {
    /// Per-node estimates
    pub nodes: BTreeMap<NodeId, NodeRisk>,
    /// Nodes above 0.7, sorted by id
    pub high_risk_nodes: Vec<NodeId>,
    /// Mean estimate across nodes
    pub mean_probability: f64,
    /// Label of the mean
    pub system_risk: RiskLabel,
}

/// Live risk overview for a snapshot
#[must_use]
pub fn real_time_probabilities(snapshot: &GraphSnapshot) -> RealTimeRisk {
    let nodes: BTreeMap<NodeId, NodeRisk> = (0..snapshot.node_count())
        .map(|idx| {
            let assessment = assess_node(snapshot, idx);
            let p = assessment.cascade_probability;
            (
                assessment.node_id,
                NodeRisk {
                    probability: p,
                    label: RiskLabel::from_probability(p),
                },
            )
        })
        .collect();

    let high_risk_nodes = nodes
        .iter()
        .filter(|(_, risk)| risk.probability > 0.7)
        .map(|(id, _)| id.clone())
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let mean_probability = if nodes.is_empty() {
        0.0
    } else {
        nodes.values().map(|r| r.probability).sum::<f64>() / nodes.len() as f64
    };

    RealTimeRisk {
        nodes,
        high_risk_nodes,
        mean_probability,
        system_risk: RiskLabel::from_probability(mean_probability),
    }
}

/// Counts from folding one telemetry frame into the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Readings applied
    pub applied: usize,
    /// Readings for unknown nodes
    pub skipped: usize,
    /// New edges added
    pub edges_added: usize,
}

/// Periodic telemetry sampler and threshold evaluator
pub struct RiskMonitor {
    telemetry: Arc<dyn TelemetrySource>,
    graph: Arc<DependencyGraph>,
    learning: Arc<AdaptiveLearningStore>,
    config: MonitorConfig,
}

impl fmt::Debug for RiskMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RiskMonitor {
    /// Create monitor
    #[must_use]
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        graph: Arc<DependencyGraph>,
        learning: Arc<AdaptiveLearningStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            telemetry,
            graph,
            learning,
            config,
        }
    }

    /// Monitor settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Sample, ingest and detect
    ///
    /// A telemetry failure yields no detections. Nodes for which
    /// `is_locked` returns true are not evaluated.
    #[tracing::instrument(skip_all)]
    pub async fn tick<F>(&self, is_locked: F) -> Vec<RiskDetection>
    where
        F: Fn(&NodeId) -> bool,
    {
        let sample = tokio::time::timeout(self.config.telemetry_timeout(), self.telemetry.sample());
        let frame = match sample.await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Telemetry sample failed");
                metrics::counter!("cascade_monitor_telemetry_failures_total").increment(1);
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.telemetry_timeout_ms,
                    "Telemetry sample timed out"
                );
                metrics::counter!("cascade_monitor_telemetry_failures_total").increment(1);
                return Vec::new();
            }
        };

        self.ingest(&frame);
        self.detect(is_locked)
    }

    /// Fold a frame into the graph
    ///
    /// Unknown nodes are skipped and duplicate edges ignored.
    pub fn ingest(&self, frame: &TelemetryFrame) -> IngestStats {
        let mut stats = IngestStats::default();

        for reading in &frame.readings {
            match self.graph.update_condition(
                &reading.node_id,
                reading.health_score,
                reading.current_load,
            ) {
                Ok(()) => stats.applied += 1,
                Err(e) => {
                    tracing::warn!(node = %reading.node_id, error = %e, "Skipping telemetry reading");
                    stats.skipped += 1;
                }
            }
        }

        for edge in &frame.new_edges {
            match self.graph.add_edge(edge.clone()) {
                Ok(()) => stats.edges_added += 1,
                Err(ForecastError::DuplicateEdge { .. }) => {}
                Err(e) => {
                    tracing::warn!(
                        source = %edge.source_node,
                        target = %edge.target_node,
                        error = %e,
                        "Skipping discovered edge"
                    );
                }
            }
        }

        tracing::debug!(
            applied = stats.applied,
            skipped = stats.skipped,
            edges_added = stats.edges_added,
            "Ingested telemetry"
        );
        stats
    }

    /// Evaluate every unlocked node against current thresholds
    pub fn detect<F>(&self, is_locked: F) -> Vec<RiskDetection>
    where
        F: Fn(&NodeId) -> bool,
    {
        let snapshot = self.graph.snapshot();
        let thresholds = self.learning.thresholds();
        let mut detections = Vec::new();

        for idx in 0..snapshot.node_count() {
            let node_id = &snapshot.node_at(idx).node_id;
            if is_locked(node_id) {
                continue;
            }

            let assessment = assess_node(&snapshot, idx);
            let Some(risk_type) = assessment.worst_exceedance(&thresholds) else {
                continue;
            };

            let coupled = snapshot
                .outgoing(idx)
                .filter(|(_, edge)| edge.failure_propagation_weight >= self.config.coupling_weight)
                .map(|(target, _)| snapshot.node_at(target).node_id.clone());

            let detection = RiskDetection::new(
                node_id.clone(),
                risk_type,
                assessment.level(risk_type),
                thresholds.get(risk_type),
            )
            .with_affected(coupled)
            .with_cascade_probability(assessment.cascade_probability)
            .with_factor("cascade_probability", assessment.cascade_probability)
            .with_factor("infrastructure_load", assessment.overload)
            .with_factor("failure_rate", assessment.failure_rate)
            .with_factor("criticality", assessment.criticality);

            tracing::info!(
                node = %detection.target_node,
                risk_type = %risk_type,
                level = detection.risk_level,
                threshold = detection.threshold,
                "Risk detected"
            );
            metrics::counter!("cascade_monitor_detections_total", "risk_type" => risk_type.as_str())
                .increment(1);
            detections.push(detection);
        }

        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockTelemetrySource, TelemetryReading};
    use crate::error::ControlError;
    use cascade_forecast::{DependencyEdge, InfrastructureNode, NodeCategory};

    fn graph() -> Arc<DependencyGraph> {
        let graph = DependencyGraph::new();
        graph
            .add_node(InfrastructureNode::new("substation", NodeCategory::PowerGrid))
            .unwrap();
        graph
            .add_node(InfrastructureNode::new("clinic", NodeCategory::Hospital))
            .unwrap();
        graph
            .add_node(InfrastructureNode::new("school", NodeCategory::School))
            .unwrap();
        graph
            .add_edge(DependencyEdge::new("substation", "clinic", "power_supply", 0.8))
            .unwrap();
        graph
            .add_edge(DependencyEdge::new("substation", "school", "power_supply", 0.3))
            .unwrap();
        Arc::new(graph)
    }

    fn monitor(telemetry: MockTelemetrySource, graph: Arc<DependencyGraph>) -> RiskMonitor {
        RiskMonitor::new(
            Arc::new(telemetry),
            graph,
            Arc::new(AdaptiveLearningStore::new()),
            MonitorConfig::default(),
        )
    }

    #[tokio::test]
    async fn failing_node_yields_one_detection() {
        let mut telemetry = MockTelemetrySource::new();
        telemetry.expect_sample().returning(|| {
            Ok(TelemetryFrame::new(vec![
                TelemetryReading::new("substation", 0.1, 50.0),
                TelemetryReading::new("unknown", 0.1, 50.0),
            ]))
        });
        let monitor = monitor(telemetry, graph());

        let detections = monitor.tick(|_| false).await;
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.target_node.as_str(), "substation");
        assert_eq!(detection.risk_type, RiskType::FailureRate);
        assert!((detection.risk_level - 0.9).abs() < 1e-12);
        assert_eq!(detection.threshold, 0.3);
        assert_eq!(
            detection.affected_nodes,
            vec![NodeId::from("substation"), NodeId::from("clinic")]
        );
        assert_eq!(detection.confidence, 0.85);
    }

    #[tokio::test]
    async fn locked_nodes_are_not_evaluated() {
        let mut telemetry = MockTelemetrySource::new();
        telemetry
            .expect_sample()
            .returning(|| Ok(TelemetryFrame::new(vec![TelemetryReading::new("substation", 0.1, 50.0)])));
        let monitor = monitor(telemetry, graph());

        let detections = monitor.tick(|id| id.as_str() == "substation").await;
        assert!(detections.is_empty());
    }

    #[tokio::test]
    async fn telemetry_failure_yields_nothing() {
        let mut telemetry = MockTelemetrySource::new();
        telemetry
            .expect_sample()
            .returning(|| Err(ControlError::Telemetry("link down".into())));
        let graph = graph();
        graph.update_condition(&"clinic".into(), 0.0, 0.0).unwrap();
        let monitor = monitor(telemetry, graph);

        assert!(monitor.tick(|_| false).await.is_empty());
    }

    #[test]
    fn ingest_adds_edges_and_ignores_duplicates() {
        let graph = graph();
        let monitor = monitor(MockTelemetrySource::new(), Arc::clone(&graph));
        let frame = TelemetryFrame::new(vec![]).with_edges(vec![
            DependencyEdge::new("clinic", "school", "medical_services", 0.4),
            DependencyEdge::new("substation", "clinic", "power_supply", 0.8),
        ]);

        let stats = monitor.ingest(&frame);
        assert_eq!(stats.edges_added, 1);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn worst_exceedance_prefers_largest_margin() {
        let assessment = RiskAssessment {
            node_id: "n".into(),
            cascade_probability: 0.75,
            overload: 0.99,
            failure_rate: 0.2,
            criticality: 0.5,
        };
        assert_eq!(
            assessment.worst_exceedance(&RiskThresholds::default()),
            Some(RiskType::InfrastructureOverload)
        );
        let calm = RiskAssessment {
            overload: 0.5,
            cascade_probability: 0.1,
            ..assessment
        };
        assert_eq!(calm.worst_exceedance(&RiskThresholds::default()), None);
    }

    #[test]
    fn real_time_labels() {
        let graph = graph();
        graph.update_condition(&"substation".into(), 0.0, 100.0).unwrap();
        let risk = real_time_probabilities(&graph.snapshot());

        assert_eq!(risk.nodes.len(), 3);
        assert_eq!(RiskLabel::from_probability(0.85), RiskLabel::Critical);
        assert_eq!(RiskLabel::from_probability(0.4), RiskLabel::Low);
        for id in &risk.high_risk_nodes {
            assert!(risk.nodes[id].probability > 0.7);
        }
    }
}
