//! Zone registry and per-batch snapshots
//!
//! The processor takes one snapshot per batch. Edits to the underlying
//! definitions become visible at the next batch, never mid-batch.

use crate::domain::types::{Checkpoint, Sector};
use crate::domain::zone::Zone;
use crate::infra::error::EngineError;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

/// Source of zone definitions, filtered to `enabled = true`
#[async_trait]
pub trait ZoneRegistry: Send + Sync {
    async fn load_active_checkpoints(&self) -> Result<Vec<Checkpoint>, EngineError>;
    async fn load_active_sectors(&self) -> Result<Vec<Sector>, EngineError>;
}

/// Registry held in memory; definitions can be swapped at runtime
#[derive(Default)]
pub struct InMemoryZoneRegistry {
    checkpoints: RwLock<Vec<Checkpoint>>,
    sectors: RwLock<Vec<Sector>>,
}

impl InMemoryZoneRegistry {
    pub fn new(checkpoints: Vec<Checkpoint>, sectors: Vec<Sector>) -> Self {
        Self { checkpoints: RwLock::new(checkpoints), sectors: RwLock::new(sectors) }
    }

    pub fn set_checkpoints(&self, checkpoints: Vec<Checkpoint>) {
        *self.checkpoints.write() = checkpoints;
    }

    pub fn set_sectors(&self, sectors: Vec<Sector>) {
        *self.sectors.write() = sectors;
    }
}

#[async_trait]
impl ZoneRegistry for InMemoryZoneRegistry {
    async fn load_active_checkpoints(&self) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(self.checkpoints.read().iter().filter(|c| c.enabled).cloned().collect())
    }

    async fn load_active_sectors(&self) -> Result<Vec<Sector>, EngineError> {
        Ok(self.sectors.read().iter().filter(|s| s.enabled).cloned().collect())
    }
}

/// Validated zones for one batch
#[derive(Debug, Clone, Default)]
pub struct ZoneSnapshot {
    zones: Vec<Zone>,
    skipped: usize,
}

impl ZoneSnapshot {
    /// Validate every definition; malformed ones are logged and left out
    pub fn build(checkpoints: &[Checkpoint], sectors: &[Sector]) -> Self {
        let mut zones = Vec::with_capacity(checkpoints.len() + sectors.len());
        let mut skipped = 0;

        for checkpoint in checkpoints {
            match Zone::from_checkpoint(checkpoint) {
                Ok(zone) => zones.push(zone),
                Err(e) => {
                    skipped += 1;
                    warn!(zone_type = "checkpoint", zone_id = %checkpoint.id, error = %e, "zone_skipped_malformed");
                }
            }
        }

        for sector in sectors {
            match Zone::from_sector(sector) {
                Ok(zone) => zones.push(zone),
                Err(e) => {
                    skipped += 1;
                    warn!(zone_type = "sector", zone_id = %sector.id, error = %e, "zone_skipped_malformed");
                }
            }
        }

        Self { zones, skipped }
    }

    /// Load both zone kinds from the registry and validate them
    pub async fn load(registry: &dyn ZoneRegistry) -> Result<Self, EngineError> {
        let checkpoints = registry.load_active_checkpoints().await?;
        let sectors = registry.load_active_sectors().await?;
        Ok(Self::build(&checkpoints, &sectors))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Definitions left out for malformed geometry
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ZoneType;

    fn square(id: &str) -> Sector {
        Sector::new(id, id, vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    #[tokio::test]
    async fn test_disabled_zones_filtered() {
        let mut off = Checkpoint::new("cp2", "Off", 0.0, 0.0, 10.0);
        off.enabled = false;
        let mut off_sector = square("s2");
        off_sector.enabled = false;

        let registry = InMemoryZoneRegistry::new(
            vec![Checkpoint::new("cp1", "On", 0.0, 0.0, 10.0), off],
            vec![square("s1"), off_sector],
        );

        let checkpoints = registry.load_active_checkpoints().await.unwrap();
        let sectors = registry.load_active_sectors().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].id.0, "cp1");
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].id.0, "s1");
    }

    #[test]
    fn test_snapshot_skips_malformed() {
        let bad_sector = Sector::new("bad", "", vec![[0.0, 0.0], [1.0, 1.0]]);
        let bad_checkpoint = Checkpoint::new("cpx", "", 120.0, 0.0, 10.0);
        let snapshot = ZoneSnapshot::build(
            &[Checkpoint::new("cp1", "", 0.0, 0.0, 10.0), bad_checkpoint],
            &[square("s1"), bad_sector],
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.skipped(), 2);
        assert_eq!(snapshot.zones()[0].zone_type, ZoneType::Checkpoint);
        assert_eq!(snapshot.zones()[1].zone_type, ZoneType::Sector);
    }

    #[tokio::test]
    async fn test_edits_visible_on_next_load() {
        let registry = InMemoryZoneRegistry::new(vec![], vec![]);
        let first = ZoneSnapshot::load(&registry).await.unwrap();
        assert!(first.is_empty());

        registry.set_checkpoints(vec![Checkpoint::new("cp1", "", 0.0, 0.0, 10.0)]);
        assert!(first.is_empty());
        let second = ZoneSnapshot::load(&registry).await.unwrap();
        assert_eq!(second.len(), 1);
    }
}
