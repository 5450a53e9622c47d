//! Engine state snapshots
//!
//! A snapshot holds the topology with current node conditions, completed
//! loops, recent predictions and the learning store. Active loops are not
//! persisted; they are re-detected after a restart.

use crate::error::ControlResult;
use crate::learning::LearningSnapshot;
use crate::types::StabilizationLoop;
use cascade_forecast::{CascadePrediction, TopologySpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persistable engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Format version
    pub version: u32,
    /// Save time
    pub saved_at: DateTime<Utc>,
    /// Graph with current node conditions
    pub topology: TopologySpec,
    /// Completed loops, oldest first
    #[serde(default)]
    pub completed_loops: Vec<StabilizationLoop>,
    /// Recent predictions, oldest first
    #[serde(default)]
    pub predictions: Vec<CascadePrediction>,
    /// Learning store contents; absent means defaults
    #[serde(default)]
    pub learning: LearningSnapshot,
}

impl EngineSnapshot {
    /// Snapshot of a topology with empty history
    #[must_use]
    pub fn new(topology: TopologySpec) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            topology,
            completed_loops: Vec::new(),
            predictions: Vec::new(),
            learning: LearningSnapshot::default(),
        }
    }

    /// Write as pretty JSON, replacing the file atomically
    ///
    /// # Errors
    /// - `ControlError::Persistence` on serialization or I/O failure
    pub fn save(&self, path: impl AsRef<Path>) -> ControlResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!(
            path = %path.display(),
            loops = self.completed_loops.len(),
            predictions = self.predictions.len(),
            "Saved engine snapshot"
        );
        Ok(())
    }

    /// Read a snapshot written by [`EngineSnapshot::save`]
    ///
    /// # Errors
    /// - `ControlError::Persistence` if the file is missing or malformed
    pub fn load(path: impl AsRef<Path>) -> ControlResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let snapshot: Self = serde_json::from_slice(&bytes)?;
        if snapshot.version > SNAPSHOT_VERSION {
            tracing::warn!(
                version = snapshot.version,
                supported = SNAPSHOT_VERSION,
                "Snapshot written by a newer version"
            );
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;

    #[test]
    fn missing_learning_section_uses_defaults() {
        let json = r#"{
            "version": 1,
            "saved_at": "2026-01-01T00:00:00Z",
            "topology": {"name": "empty", "nodes": [], "edges": []}
        }"#;
        let snapshot: EngineSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.learning, LearningSnapshot::default());
        assert!(snapshot.completed_loops.is_empty());
    }

    #[test]
    fn missing_file_is_persistence_error() {
        let err = EngineSnapshot::load("/nonexistent/cascade/state.json").unwrap_err();
        assert!(matches!(err, ControlError::Persistence(_)));
    }
}
