//! Durable unit state - per-(unit, zone) records in a JSONL file
//!
//! Each upsert appends the full record; the last line for a key wins. On open
//! the file is replayed and rewritten with one line per key, so it grows only
//! between restarts.

use crate::domain::types::{UnitId, UnitZoneState, ZoneId, ZoneKey, ZoneType};
use crate::infra::error::EngineError;
use crate::services::state_store::UnitStateStore;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize)]
struct StateRecord {
    unit_id: UnitId,
    zone_type: ZoneType,
    zone_id: ZoneId,
    #[serde(flatten)]
    state: UnitZoneState,
}

impl StateRecord {
    fn key(&self) -> ZoneKey {
        ZoneKey::new(self.unit_id.clone(), self.zone_type, self.zone_id.clone())
    }
}

/// JSONL-backed state store
pub struct JsonlStateStore {
    path: PathBuf,
    /// Guards the file and the map together
    states: Mutex<FxHashMap<ZoneKey, UnitZoneState>>,
}

impl JsonlStateStore {
    /// Replay `path` (if present) and compact it to one line per key
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut states = FxHashMap::default();
        let mut replayed = 0usize;
        let mut skipped = 0usize;

        if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("failed to open state file {}", path.display()))?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("failed to read state file {}", path.display()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StateRecord>(&line) {
                    Ok(record) => {
                        states.insert(record.key(), record.state);
                        replayed += 1;
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(line = %(line_no + 1), error = %e, "state_file_line_skipped");
                    }
                }
            }
            compact(&path, &states)
                .with_context(|| format!("failed to compact state file {}", path.display()))?;
        }

        info!(
            file_path = %path.display(),
            replayed = %replayed,
            skipped = %skipped,
            keys = %states.len(),
            "state_file_opened"
        );
        Ok(Self { path, states: Mutex::new(states) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}

/// Rewrite the file through a sibling temp file, then rename over it
fn compact(path: &Path, states: &FxHashMap<ZoneKey, UnitZoneState>) -> std::io::Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for (key, state) in states {
            let record = StateRecord {
                unit_id: key.unit_id.clone(),
                zone_type: key.zone_type,
                zone_id: key.zone_id.clone(),
                state: state.clone(),
            };
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    std::fs::rename(&tmp, path)
}

#[async_trait]
impl UnitStateStore for JsonlStateStore {
    async fn get(&self, key: &ZoneKey) -> Result<Option<UnitZoneState>, EngineError> {
        Ok(self.states.lock().get(key).cloned())
    }

    async fn upsert(&self, key: &ZoneKey, state: UnitZoneState) -> Result<(), EngineError> {
        let record = StateRecord {
            unit_id: key.unit_id.clone(),
            zone_type: key.zone_type,
            zone_id: key.zone_id.clone(),
            state,
        };
        let json =
            serde_json::to_string(&record).map_err(|e| EngineError::unavailable("state_file", e))?;

        let mut states = self.states.lock();
        self.append_line(&json).map_err(|e| EngineError::unavailable("state_file", e))?;
        states.insert(key.clone(), record.state);
        debug!(key = %key, "state_file_written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn key(unit: &str, zone: &str) -> ZoneKey {
        ZoneKey::new(UnitId::from(unit), ZoneType::Checkpoint, ZoneId::from(zone))
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.jsonl");
        let t0 = Utc.timestamp_millis_opt(0).unwrap();
        let t1 = Utc.timestamp_millis_opt(60_000).unwrap();

        let store = JsonlStateStore::open(&path).unwrap();
        store.upsert(&key("U1", "cp1"), UnitZoneState::entered(t0)).await.unwrap();
        store.upsert(&key("U1", "cp1"), UnitZoneState::seen_inside(t0, t1)).await.unwrap();
        store.upsert(&key("U2", "cp1"), UnitZoneState::left(t1)).await.unwrap();
        drop(store);

        let reopened = JsonlStateStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.get(&key("U1", "cp1")).await.unwrap(),
            Some(UnitZoneState::seen_inside(t0, t1))
        );
        assert_eq!(reopened.get(&key("U2", "cp1")).await.unwrap(), Some(UnitZoneState::left(t1)));
    }

    #[tokio::test]
    async fn test_open_compacts_to_one_line_per_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let store = JsonlStateStore::open(&path).unwrap();
        for minute in 0..5 {
            let ts = Utc.timestamp_millis_opt(minute * 60_000).unwrap();
            store.upsert(&key("U1", "cp1"), UnitZoneState::left(ts)).await.unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 5);
        drop(store);

        JsonlStateStore::open(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_bad_lines_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        fs::write(
            &path,
            "not json\n{\"unit_id\":\"U1\",\"zone_type\":\"sector\",\"zone_id\":\"s1\",\"is_inside\":false,\"entered_at\":null,\"last_seen\":\"2026-01-05T16:41:30Z\"}\n",
        )
        .unwrap();

        let store = JsonlStateStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        let sector_key = ZoneKey::new(UnitId::from("U1"), ZoneType::Sector, ZoneId::from("s1"));
        assert!(!store.get(&sector_key).await.unwrap().unwrap().is_inside);
    }
}
