//! Zone registry backed by a JSON document
//!
//! Format: `{ "checkpoints": [...], "sectors": [...] }`. The file is re-read on
//! every load so edits take effect at the next batch.

use crate::domain::types::{Checkpoint, Sector};
use crate::infra::error::EngineError;
use crate::services::zone_registry::ZoneRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk zone definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneFile {
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub sectors: Vec<Sector>,
}

pub struct JsonZoneRegistry {
    path: PathBuf,
}

impl JsonZoneRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<ZoneFile, EngineError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::unavailable("zone_registry", format!("{}: {e}", self.path.display())))?;
        let zones: ZoneFile = serde_json::from_str(&content)
            .map_err(|e| EngineError::unavailable("zone_registry", format!("{}: {e}", self.path.display())))?;
        debug!(
            file = %self.path.display(),
            checkpoints = %zones.checkpoints.len(),
            sectors = %zones.sectors.len(),
            "zone_file_loaded"
        );
        Ok(zones)
    }
}

#[async_trait]
impl ZoneRegistry for JsonZoneRegistry {
    async fn load_active_checkpoints(&self) -> Result<Vec<Checkpoint>, EngineError> {
        let zones = self.read().await?;
        Ok(zones.checkpoints.into_iter().filter(|c| c.enabled).collect())
    }

    async fn load_active_sectors(&self) -> Result<Vec<Sector>, EngineError> {
        let zones = self.read().await?;
        Ok(zones.sectors.into_iter().filter(|s| s.enabled).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const ZONES: &str = r#"{
        "checkpoints": [
            {"id": "cp1", "name": "Yard", "lat": 26.9, "lng": -105.8, "radius_m": 100},
            {"id": "cp2", "name": "Old", "lat": 26.0, "lng": -105.0, "radius_m": 50, "enabled": false}
        ],
        "sectors": [
            {"id": "s1", "name": "Field", "polygon": [[-105.80,26.90],[-105.70,26.90],[-105.70,26.80],[-105.80,26.80]]}
        ]
    }"#;

    #[tokio::test]
    async fn test_loads_enabled_zones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zones.json");
        fs::write(&path, ZONES).unwrap();

        let registry = JsonZoneRegistry::new(&path);
        let checkpoints = registry.load_active_checkpoints().await.unwrap();
        let sectors = registry.load_active_sectors().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].radius_m, 100.0);
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].polygon[0].len(), 4);
    }

    #[tokio::test]
    async fn test_missing_file_is_transient() {
        let registry = JsonZoneRegistry::new("/nonexistent/zones.json");
        let err = registry.load_active_checkpoints().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_edits_picked_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zones.json");
        fs::write(&path, r#"{"checkpoints": []}"#).unwrap();

        let registry = JsonZoneRegistry::new(&path);
        assert!(registry.load_active_checkpoints().await.unwrap().is_empty());

        fs::write(&path, ZONES).unwrap();
        assert_eq!(registry.load_active_checkpoints().await.unwrap().len(), 1);
    }
}
