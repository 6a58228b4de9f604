//! Event emission and the dwell suppression policy
//!
//! The sink appends every event it is given; it never deduplicates. Keeping
//! dwell events from flooding is the processor's job, through `DwellPolicy`.

use crate::domain::event::{EventKey, EventType, ZoneEvent};
use crate::domain::types::ZoneKey;
use crate::infra::config::Config;
use crate::infra::error::EngineError;
use crate::io::egress_channel::EgressSender;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Append-only event log
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &ZoneEvent) -> Result<(), EngineError>;

    /// Most recent event timestamp for `key` within `[from, to]`
    async fn latest_between(
        &self,
        key: &EventKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EngineError>;
}

/// Event timestamps per key, ordered for range lookups
#[derive(Debug, Default)]
pub struct EventIndex {
    by_key: FxHashMap<EventKey, BTreeSet<DateTime<Utc>>>,
}

impl EventIndex {
    pub fn insert(&mut self, event: &ZoneEvent) {
        self.by_key.entry(event.key()).or_default().insert(event.timestamp);
    }

    pub fn latest_between(
        &self,
        key: &EventKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if from > to {
            return None;
        }
        self.by_key.get(key)?.range(from..=to).next_back().copied()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

/// Event log kept entirely in memory
#[derive(Default)]
pub struct InMemoryEventLog {
    inner: RwLock<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    events: Vec<ZoneEvent>,
    index: EventIndex,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in append order
    pub fn events(&self) -> Vec<ZoneEvent> {
        self.inner.read().events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

#[async_trait]
impl EventSink for InMemoryEventLog {
    async fn append(&self, event: &ZoneEvent) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        inner.index.insert(event);
        inner.events.push(event.clone());
        Ok(())
    }

    async fn latest_between(
        &self,
        key: &EventKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(self.inner.read().index.latest_between(key, from, to))
    }
}

/// When a dwell is due and when it must be withheld
#[derive(Debug, Clone, Copy)]
pub struct DwellPolicy {
    pub threshold: Duration,
    pub suppression: Duration,
}

impl Default for DwellPolicy {
    fn default() -> Self {
        Self { threshold: Duration::minutes(10), suppression: Duration::minutes(15) }
    }
}

impl DwellPolicy {
    pub fn from_config(config: &Config) -> Self {
        let default = Self::default();
        Self {
            threshold: Duration::from_std(config.dwell_threshold()).unwrap_or(default.threshold),
            suppression: Duration::from_std(config.dwell_suppression())
                .unwrap_or(default.suppression),
        }
    }

    /// Minutes inside if the threshold has been reached, else None
    pub fn due(&self, entered_at: DateTime<Utc>, ts: DateTime<Utc>) -> Option<f64> {
        let elapsed = ts - entered_at;
        if elapsed >= self.threshold {
            Some(elapsed.num_milliseconds() as f64 / 60_000.0)
        } else {
            None
        }
    }

    /// Start of the window searched for a prior dwell
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts - self.suppression
    }

    /// A prior dwell at `previous` withholds one at `ts` while inside the window
    pub fn suppresses(&self, previous: DateTime<Utc>, ts: DateTime<Utc>) -> bool {
        ts - previous < self.suppression
    }
}

/// Writes events to the sink and forwards them downstream
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    egress: Option<EgressSender>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, egress: None }
    }

    pub fn with_egress(mut self, egress: EgressSender) -> Self {
        self.egress = Some(egress);
        self
    }

    /// Append the event and return its id
    ///
    /// Downstream forwarding is best-effort; a full channel drops the copy.
    pub async fn emit(&self, event: &ZoneEvent) -> Result<String, EngineError> {
        self.sink.append(event).await?;
        if let Some(egress) = &self.egress {
            if !egress.send_event(event) {
                debug!(event_id = %event.id, "egress_event_dropped");
            }
        }
        Ok(event.id.clone())
    }

    /// Latest dwell for `key` that could suppress one at `ts`
    pub async fn recent_dwell(
        &self,
        key: &EventKey,
        policy: &DwellPolicy,
        ts: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.sink.latest_between(key, policy.window_start(ts), ts).await
    }

    /// Enter or exit most recently logged for `key` at or before `ts`
    ///
    /// None when neither was logged, or both share the latest instant.
    pub async fn last_transition(
        &self,
        key: &ZoneKey,
        ts: DateTime<Utc>,
    ) -> Result<Option<(EventType, DateTime<Utc>)>, EngineError> {
        let since = DateTime::<Utc>::MIN_UTC;
        let enter = self.sink.latest_between(&EventKey::new(key, EventType::Enter), since, ts).await?;
        let exit = self.sink.latest_between(&EventKey::new(key, EventType::Exit), since, ts).await?;
        Ok(match (enter, exit) {
            (Some(entered), Some(left)) if entered == left => None,
            (Some(entered), Some(left)) if entered > left => Some((EventType::Enter, entered)),
            (_, Some(left)) => Some((EventType::Exit, left)),
            (Some(entered), None) => Some((EventType::Enter, entered)),
            (None, None) => None,
        })
    }
}
