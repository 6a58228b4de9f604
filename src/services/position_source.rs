//! Source of raw positions awaiting evaluation

use crate::domain::types::{Position, PositionId};
use crate::infra::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Up to `limit` unprocessed positions, oldest first (ties by id)
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<Position>, EngineError>;

    /// Flag a position processed; it will never be fetched again
    async fn mark_processed(&self, id: &PositionId) -> Result<(), EngineError>;
}

/// Processed ids remembered for duplicate detection
pub const DEFAULT_PROCESSED_MEMORY: usize = 100_000;

/// In-memory position table fed by the MQTT intake or by tests
///
/// Only unprocessed positions are held, ordered by (timestamp, id). A
/// processed position is dropped and its id kept in a bounded FIFO so a
/// redelivered copy is still rejected.
pub struct PositionQueue {
    inner: RwLock<QueueInner>,
    processed_memory: usize,
}

#[derive(Default)]
struct QueueInner {
    pending: BTreeMap<(DateTime<Utc>, PositionId), Position>,
    pending_ts: FxHashMap<PositionId, DateTime<Utc>>,
    processed: FxHashSet<PositionId>,
    processed_order: VecDeque<PositionId>,
}

impl Default for PositionQueue {
    fn default() -> Self {
        Self::with_processed_memory(DEFAULT_PROCESSED_MEMORY)
    }
}

impl PositionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processed_memory(processed_memory: usize) -> Self {
        Self { inner: RwLock::new(QueueInner::default()), processed_memory }
    }

    /// Insert a position. Returns false if the id is pending or recently processed.
    pub fn push(&self, position: Position) -> bool {
        let mut inner = self.inner.write();
        if inner.pending_ts.contains_key(&position.id) || inner.processed.contains(&position.id) {
            return false;
        }
        inner.pending_ts.insert(position.id.clone(), position.timestamp);
        inner.pending.insert((position.timestamp, position.id.clone()), position);
        true
    }

    pub fn extend(&self, positions: impl IntoIterator<Item = Position>) -> usize {
        positions.into_iter().map(|p| self.push(p)).filter(|&added| added).count()
    }

    /// A pending position by id
    pub fn get(&self, id: &PositionId) -> Option<Position> {
        let inner = self.inner.read();
        let ts = *inner.pending_ts.get(id)?;
        inner.pending.get(&(ts, id.clone())).cloned()
    }

    pub fn is_processed(&self, id: &PositionId) -> bool {
        self.inner.read().processed.contains(id)
    }

    pub fn unprocessed_len(&self) -> usize {
        self.inner.read().pending.len()
    }

    /// Processed ids currently remembered
    pub fn processed_len(&self) -> usize {
        self.inner.read().processed.len()
    }

    /// Positions held, which is only the unprocessed ones
    pub fn len(&self) -> usize {
        self.unprocessed_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().pending.is_empty()
    }
}

#[async_trait]
impl PositionSource for PositionQueue {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<Position>, EngineError> {
        Ok(self.inner.read().pending.values().take(limit).cloned().collect())
    }

    async fn mark_processed(&self, id: &PositionId) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if inner.processed.contains(id) {
            return Ok(());
        }
        let Some(ts) = inner.pending_ts.remove(id) else {
            return Err(EngineError::unavailable("position_source", format!("unknown position {id}")));
        };
        inner.pending.remove(&(ts, id.clone()));

        inner.processed.insert(id.clone());
        inner.processed_order.push_back(id.clone());
        while inner.processed_order.len() > self.processed_memory {
            if let Some(oldest) = inner.processed_order.pop_front() {
                inner.processed.remove(&oldest);
            }
        }
        Ok(())
    }
}
