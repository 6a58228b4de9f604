//! Per-(unit, zone) containment state
//!
//! The processor is the only writer. Absence of a record means the unit has
//! never been seen inside the zone and is treated as outside.

use crate::domain::types::{UnitZoneState, ZoneKey};
use crate::infra::error::EngineError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[async_trait]
pub trait UnitStateStore: Send + Sync {
    async fn get(&self, key: &ZoneKey) -> Result<Option<UnitZoneState>, EngineError>;

    /// Replace the record for `key`. Writing the same state twice is harmless.
    async fn upsert(&self, key: &ZoneKey, state: UnitZoneState) -> Result<(), EngineError>;
}

/// Keyed map behind a lock; each call is a single read or a single write
#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<FxHashMap<ZoneKey, UnitZoneState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Copy of the record for inspection
    pub fn snapshot(&self, key: &ZoneKey) -> Option<UnitZoneState> {
        self.states.read().get(key).cloned()
    }
}

#[async_trait]
impl UnitStateStore for InMemoryStateStore {
    async fn get(&self, key: &ZoneKey) -> Result<Option<UnitZoneState>, EngineError> {
        Ok(self.states.read().get(key).cloned())
    }

    async fn upsert(&self, key: &ZoneKey, state: UnitZoneState) -> Result<(), EngineError> {
        self.states.write().insert(key.clone(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{UnitId, ZoneId, ZoneType};
    use chrono::{TimeZone, Utc};

    fn key(unit: &str, zone: &str) -> ZoneKey {
        ZoneKey::new(UnitId::from(unit), ZoneType::Checkpoint, ZoneId::from(zone))
    }

    #[tokio::test]
    async fn test_absent_key_returns_none() {
        let store = InMemoryStateStore::new();
        assert!(store.get(&key("U1", "cp1")).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = InMemoryStateStore::new();
        let t0 = Utc.timestamp_millis_opt(0).unwrap();
        let t1 = Utc.timestamp_millis_opt(60_000).unwrap();

        store.upsert(&key("U1", "cp1"), UnitZoneState::entered(t0)).await.unwrap();
        store.upsert(&key("U1", "cp1"), UnitZoneState::left(t1)).await.unwrap();
        store.upsert(&key("U1", "cp1"), UnitZoneState::left(t1)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("U1", "cp1")).await.unwrap(), Some(UnitZoneState::left(t1)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryStateStore::new();
        let t0 = Utc.timestamp_millis_opt(0).unwrap();
        store.upsert(&key("U1", "cp1"), UnitZoneState::entered(t0)).await.unwrap();

        assert!(store.get(&key("U2", "cp1")).await.unwrap().is_none());
        assert!(store.get(&key("U1", "cp2")).await.unwrap().is_none());
        let sector_key = ZoneKey::new(UnitId::from("U1"), ZoneType::Sector, ZoneId::from("cp1"));
        assert!(store.get(&sector_key).await.unwrap().is_none());
    }
}
