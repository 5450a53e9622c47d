//! Core types for the forecast engine
//!
//! Defines the infrastructure data model:
//! - Node identity, category and geographic location
//! - Infrastructure nodes and dependency edges
//! - Failure modes and their propagation multipliers

use crate::error::ForecastError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Mean Earth radius used for great-circle distances
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Maximum redundancy level a node can carry
pub const MAX_REDUNDANCY: u8 = 5;

/// Unique infrastructure node identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create node id from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Unique cascade prediction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PredictionId(pub Ulid);

impl PredictionId {
    /// Generate new prediction ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique pre-stabilization strategy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub Ulid);

impl StrategyId {
    /// Generate new strategy ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Infrastructure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Power generation or substation
    PowerGrid,
    /// Telecom tower
    TelecomTower,
    /// Water treatment or distribution
    WaterSystem,
    /// Bridge or transport corridor
    TransportBridge,
    /// Hospital
    Hospital,
    /// School
    School,
    /// Communication / control center
    CommunicationCenter,
}

impl NodeCategory {
    /// All categories, in declaration order
    pub const ALL: [NodeCategory; 7] = [
        NodeCategory::PowerGrid,
        NodeCategory::TelecomTower,
        NodeCategory::WaterSystem,
        NodeCategory::TransportBridge,
        NodeCategory::Hospital,
        NodeCategory::School,
        NodeCategory::CommunicationCenter,
    ];

    /// Wire tag for this category
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCategory::PowerGrid => "power_grid",
            NodeCategory::TelecomTower => "telecom_tower",
            NodeCategory::WaterSystem => "water_system",
            NodeCategory::TransportBridge => "transport_bridge",
            NodeCategory::Hospital => "hospital",
            NodeCategory::School => "school",
            NodeCategory::CommunicationCenter => "communication_center",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lon: f64,
}

impl GeoLocation {
    /// Create location
    #[inline]
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle (haversine) distance in kilometres
    #[must_use]
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Infrastructure node in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureNode {
    /// Unique id
    pub node_id: NodeId,
    /// Human-readable name
    pub name: String,
    /// Infrastructure category
    pub category: NodeCategory,
    /// Geographic location
    pub location: GeoLocation,
    /// Nominal capacity (category-specific units)
    pub capacity: f64,
    /// Current load, same units as capacity
    pub current_load: f64,
    /// Health in [0, 1]
    pub health_score: f64,
    /// Number of backup systems, 0..=5
    pub redundancy_level: u8,
    /// Expected repair time
    pub repair_time_hours: f64,
    /// Static importance in [0, 1]
    pub criticality_score: f64,
    /// Nodes this node needs, in insertion order
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    /// Nodes that need this node, in insertion order
    #[serde(default)]
    pub dependents: Vec<NodeId>,
}

impl InfrastructureNode {
    /// Create a healthy, idle node
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, category: NodeCategory) -> Self {
        let node_id = node_id.into();
        Self {
            name: node_id.to_string(),
            node_id,
            category,
            location: GeoLocation::default(),
            capacity: 100.0,
            current_load: 0.0,
            health_score: 1.0,
            redundancy_level: 0,
            repair_time_hours: 4.0,
            criticality_score: 0.5,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With location
    #[inline]
    #[must_use]
    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.location = GeoLocation::new(lat, lon);
        self
    }

    /// With capacity and load
    #[inline]
    #[must_use]
    pub fn with_load(mut self, capacity: f64, current_load: f64) -> Self {
        self.capacity = capacity;
        self.current_load = current_load;
        self
    }

    /// With health score (clamped)
    #[inline]
    #[must_use]
    pub fn with_health(mut self, health: f64) -> Self {
        self.health_score = health.clamp(0.0, 1.0);
        self
    }

    /// With redundancy level (clamped to 0..=5)
    #[inline]
    #[must_use]
    pub fn with_redundancy(mut self, level: u8) -> Self {
        self.redundancy_level = level.min(MAX_REDUNDANCY);
        self
    }

    /// With criticality score (clamped)
    #[inline]
    #[must_use]
    pub fn with_criticality(mut self, criticality: f64) -> Self {
        self.criticality_score = criticality.clamp(0.0, 1.0);
        self
    }

    /// With repair time
    #[inline]
    #[must_use]
    pub fn with_repair_time(mut self, hours: f64) -> Self {
        self.repair_time_hours = hours;
        self
    }

    /// Load as a fraction of capacity, clamped to [0, 1]
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0.0 {
            return 1.0;
        }
        (self.current_load / self.capacity).clamp(0.0, 1.0)
    }

    /// Redundancy as a fraction of the maximum
    #[inline]
    #[must_use]
    pub fn redundancy_fraction(&self) -> f64 {
        f64::from(self.redundancy_level.min(MAX_REDUNDANCY)) / f64::from(MAX_REDUNDANCY)
    }

    /// Clamp every bounded attribute into its valid range
    pub fn normalize(&mut self) {
        self.health_score = self.health_score.clamp(0.0, 1.0);
        self.criticality_score = self.criticality_score.clamp(0.0, 1.0);
        self.redundancy_level = self.redundancy_level.min(MAX_REDUNDANCY);
        self.capacity = self.capacity.max(0.0);
        self.current_load = self.current_load.max(0.0);
    }
}

/// Directed dependency: failure of `source_node` may propagate to `target_node`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Supplying node
    pub source_node: NodeId,
    /// Dependent node
    pub target_node: NodeId,
    /// Dependency label (power_supply, data_link, ...)
    pub dependency_type: String,
    /// Probability mass a source failure contributes to the target, [0, 1]
    pub failure_propagation_weight: f64,
    /// How much target recovery needs the source, [0, 1]
    pub recovery_dependency: f64,
    /// Physical distance between endpoints
    pub distance_km: f64,
}

impl DependencyEdge {
    /// Create edge with the given propagation weight
    #[must_use]
    pub fn new(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        dependency_type: impl Into<String>,
        failure_propagation_weight: f64,
    ) -> Self {
        Self {
            source_node: source.into(),
            target_node: target.into(),
            dependency_type: dependency_type.into(),
            failure_propagation_weight: failure_propagation_weight.clamp(0.0, 1.0),
            recovery_dependency: 0.0,
            distance_km: 0.0,
        }
    }

    /// With recovery dependency (clamped)
    #[inline]
    #[must_use]
    pub fn with_recovery_dependency(mut self, value: f64) -> Self {
        self.recovery_dependency = value.clamp(0.0, 1.0);
        self
    }

    /// With distance
    #[inline]
    #[must_use]
    pub fn with_distance(mut self, km: f64) -> Self {
        self.distance_km = km;
        self
    }
}

/// How the initial node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Load beyond capacity
    Overload,
    /// Storm, flood, heat
    WeatherDamage,
    /// Physical structure compromised
    StructuralDamage,
    /// Component failure
    EquipmentFailure,
    /// Loss of supply power
    PowerOutage,
    /// Loss of data / control links
    ConnectivityLoss,
}

impl FailureMode {
    /// Wire tag for this mode
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Overload => "overload",
            FailureMode::WeatherDamage => "weather_damage",
            FailureMode::StructuralDamage => "structural_damage",
            FailureMode::EquipmentFailure => "equipment_failure",
            FailureMode::PowerOutage => "power_outage",
            FailureMode::ConnectivityLoss => "connectivity_loss",
        }
    }

    /// Propagation multiplier applied to an edge ending at `target`
    #[must_use]
    pub fn multiplier(&self, target: NodeCategory) -> f64 {
        match (self, target) {
            (FailureMode::Overload, _) => 1.2,
            (FailureMode::PowerOutage, NodeCategory::PowerGrid) => 1.5,
            _ => 1.0,
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overload" => Ok(FailureMode::Overload),
            "weather_damage" => Ok(FailureMode::WeatherDamage),
            "structural_damage" => Ok(FailureMode::StructuralDamage),
            "equipment_failure" => Ok(FailureMode::EquipmentFailure),
            "power_outage" => Ok(FailureMode::PowerOutage),
            "connectivity_loss" => Ok(FailureMode::ConnectivityLoss),
            _ => Err(ForecastError::InvalidFailureMode(s.to_string())),
        }
    }
}
