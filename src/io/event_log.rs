//! Durable event log - appends zone events to a JSONL file
//!
//! One JSON object per line. On open the existing file is replayed to rebuild
//! the per-key timestamp index, so dwell suppression holds across restarts.

use crate::domain::event::{EventKey, ZoneEvent};
use crate::infra::error::EngineError;
use crate::services::emitter::{EventIndex, EventSink};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// JSONL-backed event sink
pub struct JsonlEventLog {
    path: PathBuf,
    /// Guards the file and the index together so they never disagree
    index: Mutex<EventIndex>,
}

impl JsonlEventLog {
    /// Open (or create on first append) the log at `path`, replaying existing lines
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut index = EventIndex::default();
        let mut replayed = 0usize;
        let mut skipped = 0usize;

        if path.exists() {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("failed to open event log {}", path.display()))?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("failed to read event log {}", path.display()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ZoneEvent>(&line) {
                    Ok(event) => {
                        index.insert(&event);
                        replayed += 1;
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(line = %(line_no + 1), error = %e, "event_log_line_skipped");
                    }
                }
            }
        }

        info!(
            file_path = %path.display(),
            replayed = %replayed,
            skipped = %skipped,
            keys = %index.key_count(),
            "event_log_opened"
        );
        Ok(Self { path, index: Mutex::new(index) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlEventLog {
    async fn append(&self, event: &ZoneEvent) -> Result<(), EngineError> {
        let json =
            serde_json::to_string(event).map_err(|e| EngineError::unavailable("event_log", e))?;

        let mut index = self.index.lock();
        self.append_line(&json).map_err(|e| EngineError::unavailable("event_log", e))?;
        index.insert(event);
        debug!(event_id = %event.id, bytes = %json.len(), "event_log_written");
        Ok(())
    }

    async fn latest_between(
        &self,
        key: &EventKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(self.index.lock().latest_between(key, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventType;
    use crate::domain::types::{GeoPoint, UnitId, ZoneId, ZoneKey, ZoneType};
    use chrono::{Duration, TimeZone};
    use std::fs;
    use tempfile::tempdir;

    fn dwell_at(minutes: i64) -> ZoneEvent {
        let key = ZoneKey::new(UnitId::from("U1"), ZoneType::Checkpoint, ZoneId::from("cp1"));
        let ts = Utc.timestamp_millis_opt(1_767_631_290_048).unwrap() + Duration::minutes(minutes);
        ZoneEvent::new(EventType::Dwell, &key, "Yard", GeoPoint::new(26.9, -105.8), ts)
            .with_dwell_minutes(minutes as f64)
    }

    #[tokio::test]
    async fn test_append_writes_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let log = JsonlEventLog::open(&path).unwrap();

        log.append(&dwell_at(10)).await.unwrap();
        log.append(&dwell_at(30)).await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "dwell");
        assert_eq!(first["unit_id"], "U1");
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let event = dwell_at(10);
        {
            let log = JsonlEventLog::open(&path).unwrap();
            log.append(&event).await.unwrap();
        }

        let reopened = JsonlEventLog::open(&path).unwrap();
        let latest = reopened
            .latest_between(&event.key(), event.timestamp - Duration::minutes(15), event.timestamp)
            .await
            .unwrap();
        assert_eq!(latest, Some(event.timestamp));
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&dwell_at(10)).unwrap();
        fs::write(&path, format!("{good}\nnot json\n\n")).unwrap();

        let log = JsonlEventLog::open(&path).unwrap();
        assert_eq!(log.index.lock().key_count(), 1);
    }
}
