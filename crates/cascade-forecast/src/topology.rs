//! Static topology descriptions
//!
//! A [`TopologySpec`] lists nodes and edges and can be read from JSON, YAML
//! or TOML. [`TopologySpec::metro_reference`] returns the built-in
//! metropolitan network used by the CLI and by tests.

use crate::error::{ForecastError, ForecastResult};
use crate::graph::DependencyGraph;
use crate::types::{DependencyEdge, InfrastructureNode};
use serde::{Deserialize, Serialize};
use std::path::Path;

const METRO_REFERENCE: &str = include_str!("../assets/metro_topology.json");

/// Serialization format of a topology file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyFormat {
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
}

impl TopologyFormat {
    /// Detect format from a file extension
    ///
    /// # Errors
    /// - `ForecastError::TopologyFormat` for an unknown or missing extension
    pub fn from_path(path: &Path) -> ForecastResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ForecastError::TopologyFormat(format!(
                "unsupported topology file: {}",
                path.display()
            ))),
        }
    }
}

/// Nodes and edges of an infrastructure network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    /// Network name
    #[serde(default)]
    pub name: String,
    /// Nodes, in registration order
    #[serde(default)]
    pub nodes: Vec<InfrastructureNode>,
    /// Edges, in registration order
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl TopologySpec {
    /// Parse from a string in the given format
    ///
    /// # Errors
    /// - `ForecastError::TopologyFormat` if the text cannot be parsed
    pub fn parse(text: &str, format: TopologyFormat) -> ForecastResult<Self> {
        match format {
            TopologyFormat::Json => {
                serde_json::from_str(text).map_err(|e| ForecastError::TopologyFormat(e.to_string()))
            }
            TopologyFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| ForecastError::TopologyFormat(e.to_string()))
            }
            TopologyFormat::Toml => {
                toml::from_str(text).map_err(|e| ForecastError::TopologyFormat(e.to_string()))
            }
        }
    }

    /// Read and parse a topology file, format chosen by extension
    ///
    /// # Errors
    /// - `ForecastError::TopologyFormat` on I/O, extension or parse failure
    pub fn load(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let path = path.as_ref();
        let format = TopologyFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::TopologyFormat(format!("{}: {e}", path.display())))?;
        Self::parse(&text, format)
    }

    /// Built-in metropolitan reference network (18 nodes, 21 edges)
    ///
    /// # Errors
    /// - `ForecastError::TopologyFormat` if the embedded asset is corrupt
    pub fn metro_reference() -> ForecastResult<Self> {
        Self::parse(METRO_REFERENCE, TopologyFormat::Json)
    }
}

impl DependencyGraph {
    /// Build a graph from a topology description
    ///
    /// # Errors
    /// - `ForecastError::InvalidTopology` if a node is duplicated or an edge
    ///   is dangling, self-looped or duplicated
    pub fn from_topology(spec: &TopologySpec) -> ForecastResult<Self> {
        let graph = DependencyGraph::new();
        for node in &spec.nodes {
            graph
                .add_node(node.clone())
                .map_err(|e| ForecastError::InvalidTopology(e.to_string()))?;
        }
        for edge in &spec.edges {
            graph
                .add_edge(edge.clone())
                .map_err(|e| ForecastError::InvalidTopology(e.to_string()))?;
        }

        tracing::info!(
            name = %spec.name,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "topology loaded"
        );
        Ok(graph)
    }

    /// Export the current graph as a topology description
    #[must_use]
    pub fn to_topology(&self, name: impl Into<String>) -> TopologySpec {
        let snapshot = self.snapshot();
        TopologySpec {
            name: name.into(),
            nodes: snapshot
                .nodes()
                .cloned()
                .map(|mut n| {
                    n.dependencies.clear();
                    n.dependents.clear();
                    n
                })
                .collect(),
            edges: snapshot.edges().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeCategory;
    use std::path::PathBuf;

    #[test]
    fn metro_reference_shape() {
        let spec = TopologySpec::metro_reference().unwrap();
        assert_eq!(spec.nodes.len(), 18);
        assert_eq!(spec.edges.len(), 21);

        let graph = DependencyGraph::from_topology(&spec).unwrap();
        assert_eq!(graph.node_count(), 18);
        assert_eq!(graph.edge_count(), 21);

        let deps = graph.dependents(&"power_main_mumbai".into()).unwrap();
        assert_eq!(deps.len(), 4);
        assert_eq!(deps[0].as_str(), "telecom_main_mumbai");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            TopologyFormat::from_path(&PathBuf::from("net.YML")).unwrap(),
            TopologyFormat::Yaml
        );
        assert!(TopologyFormat::from_path(&PathBuf::from("net.csv")).is_err());
    }

    #[test]
    fn yaml_topology_clamps_on_ingest() {
        let text = r"
name: tiny
nodes:
  - node_id: p
    name: plant
    category: power_grid
    location: { lat: 0.0, lon: 0.0 }
    capacity: 10.0
    current_load: 5.0
    health_score: 1.4
    redundancy_level: 8
    repair_time_hours: 2.0
    criticality_score: 0.9
edges: []
";
        let spec = TopologySpec::parse(text, TopologyFormat::Yaml).unwrap();
        let graph = DependencyGraph::from_topology(&spec).unwrap();
        let p = graph.node(&"p".into()).unwrap();
        assert_eq!(p.category, NodeCategory::PowerGrid);
        assert_eq!(p.health_score, 1.0);
        assert_eq!(p.redundancy_level, 5);
    }

    #[test]
    fn dangling_edge_is_invalid() {
        let spec = TopologySpec {
            name: "broken".into(),
            nodes: vec![InfrastructureNode::new("a", NodeCategory::School)],
            edges: vec![DependencyEdge::new("a", "b", "data_link", 0.5)],
        };
        assert!(matches!(
            DependencyGraph::from_topology(&spec),
            Err(ForecastError::InvalidTopology(_))
        ));
    }

    #[test]
    fn export_round_trips_edges() {
        let spec = TopologySpec::metro_reference().unwrap();
        let graph = DependencyGraph::from_topology(&spec).unwrap();
        let exported = graph.to_topology("copy");
        assert_eq!(exported.edges, spec.edges);
        assert_eq!(exported.nodes.len(), spec.nodes.len());
    }
}
