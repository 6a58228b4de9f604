//! Position processing: the orchestrator of the geofence engine
//!
//! One batch:
//! - fetch up to `batch_size` unprocessed positions, oldest first
//! - take one zone snapshot (registry failure fails the whole batch)
//! - group positions by unit; units run concurrently, each unit's positions
//!   strictly in timestamp order
//! - per position, evaluate every zone, then mark it processed as the last write
//!
//! A transient failure on any zone leaves the position unprocessed and stops
//! that unit for this batch, so its remaining positions are retried in order
//! next time. Malformed positions are logged and left unprocessed without
//! stopping the unit.

mod transitions;

pub use transitions::{decide, Transition};

use crate::domain::event::{EventKey, EventType, ZoneEvent};
use crate::domain::types::{GeoPoint, Position, PositionId, UnitId, UnitZoneState, ZoneKey};
use crate::domain::zone::Zone;
use crate::infra::config::Config;
use crate::infra::error::{with_timeout, EngineError};
use crate::infra::metrics::Metrics;
use crate::services::emitter::{DwellPolicy, EventEmitter};
use crate::services::position_source::PositionSource;
use crate::services::state_store::UnitStateStore;
use crate::services::zone_registry::{ZoneRegistry, ZoneSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Tunables for the processor
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub max_concurrent_units: usize,
    /// Deadline for every registry, store, sink and source call
    pub call_timeout: Duration,
    /// Failed attempts after which a position is reported stuck
    pub stuck_after_attempts: u32,
    pub dwell: DwellPolicy,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent_units: 8,
            call_timeout: Duration::from_secs(5),
            stuck_after_attempts: 5,
            dwell: DwellPolicy::default(),
        }
    }
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size(),
            max_concurrent_units: config.max_concurrent_units(),
            call_timeout: config.call_timeout(),
            stuck_after_attempts: config.stuck_after_attempts(),
            dwell: DwellPolicy::from_config(config),
        }
    }
}

/// Counts for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub processed: usize,
    pub malformed: usize,
    pub failed: usize,
    /// Units stopped early after a failure
    pub units_halted: usize,
    pub events_enter: usize,
    pub events_exit: usize,
    pub events_dwell: usize,
    pub dwell_suppressed: usize,
    /// (position, zone) evaluations ignored as older than the stored state
    pub stale: usize,
    /// Enter/exit found in the log but missing from state, repaired without emitting
    pub transitions_recovered: usize,
    pub zones_active: usize,
    pub zones_skipped: usize,
}

impl BatchReport {
    pub fn events_emitted(&self) -> usize {
        self.events_enter + self.events_exit + self.events_dwell
    }

    fn merge(&mut self, other: &BatchReport) {
        self.processed += other.processed;
        self.malformed += other.malformed;
        self.failed += other.failed;
        self.units_halted += other.units_halted;
        self.events_enter += other.events_enter;
        self.events_exit += other.events_exit;
        self.events_dwell += other.events_dwell;
        self.dwell_suppressed += other.dwell_suppressed;
        self.stale += other.stale;
        self.transitions_recovered += other.transitions_recovered;
    }

    fn count_event(&mut self, event_type: EventType) {
        match event_type {
            EventType::Enter => self.events_enter += 1,
            EventType::Exit => self.events_exit += 1,
            EventType::Dwell => self.events_dwell += 1,
        }
    }
}

enum PositionOutcome {
    Processed,
    Malformed,
}

/// Drives positions through the per-(unit, zone) state machine
#[derive(Clone)]
pub struct PositionProcessor {
    source: Arc<dyn PositionSource>,
    registry: Arc<dyn ZoneRegistry>,
    states: Arc<dyn UnitStateStore>,
    emitter: EventEmitter,
    metrics: Arc<Metrics>,
    settings: ProcessorSettings,
    /// Failed attempts per position, cleared on success
    attempts: Arc<Mutex<FxHashMap<PositionId, u32>>>,
}

impl PositionProcessor {
    pub fn new(
        source: Arc<dyn PositionSource>,
        registry: Arc<dyn ZoneRegistry>,
        states: Arc<dyn UnitStateStore>,
        emitter: EventEmitter,
        metrics: Arc<Metrics>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            source,
            registry,
            states,
            emitter,
            metrics,
            settings,
            attempts: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Failed attempts recorded for a position
    pub fn attempts(&self, id: &PositionId) -> u32 {
        self.attempts.lock().get(id).copied().unwrap_or(0)
    }

    /// Run batches every `period` until shutdown
    ///
    /// Each batch completes before the next tick is taken, so batches never overlap.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = %period.as_secs(), batch_size = %self.settings.batch_size, "processor_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("processor_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    // Failures are logged inside run_batch and retried next tick
                    let _ = self.run_batch().await;
                }
            }
        }
    }

    /// Process one batch of unprocessed positions
    ///
    /// Returns Err only when nothing could be evaluated (source or registry
    /// unavailable). Per-position failures are reported in the `BatchReport`.
    pub async fn run_batch(&self) -> Result<BatchReport, EngineError> {
        let start = Instant::now();
        let timeout = self.settings.call_timeout;

        let positions = match with_timeout(
            "position_source",
            timeout,
            self.source.fetch_unprocessed(self.settings.batch_size),
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                self.metrics.record_batch_failed();
                error!(error = %e, "batch_fetch_failed");
                return Err(e);
            }
        };

        let mut report = BatchReport { fetched: positions.len(), ..Default::default() };
        if positions.is_empty() {
            self.metrics.record_batch(start.elapsed().as_millis() as u64);
            debug!("batch_empty");
            return Ok(report);
        }

        let snapshot = match with_timeout("zone_registry", timeout, ZoneSnapshot::load(&*self.registry)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_batch_failed();
                error!(error = %e, positions = %positions.len(), "batch_zone_load_failed");
                return Err(e);
            }
        };
        self.metrics.record_zone_snapshot(snapshot.len(), snapshot.skipped());
        report.zones_active = snapshot.len();
        report.zones_skipped = snapshot.skipped();

        let snapshot = Arc::new(snapshot);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_units));
        let mut tasks = JoinSet::new();

        for (unit_id, unit_positions) in group_by_unit(positions) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EngineError::unavailable("unit_scheduler", e))?;
            let processor = self.clone();
            let snapshot = snapshot.clone();
            tasks.spawn(async move {
                let _permit = permit;
                processor.process_unit(&unit_id, unit_positions, &snapshot).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unit_report) => report.merge(&unit_report),
                Err(e) => error!(error = %e, "unit_task_failed"),
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_batch(elapsed_ms);
        info!(
            fetched = %report.fetched,
            processed = %report.processed,
            malformed = %report.malformed,
            failed = %report.failed,
            events = %report.events_emitted(),
            dwell_suppressed = %report.dwell_suppressed,
            recovered = %report.transitions_recovered,
            zones = %report.zones_active,
            zones_skipped = %report.zones_skipped,
            elapsed_ms = %elapsed_ms,
            "batch_complete"
        );

        Ok(report)
    }

    /// Positions of one unit, in order; stops at the first failed position
    async fn process_unit(
        &self,
        unit_id: &UnitId,
        positions: Vec<Position>,
        snapshot: &ZoneSnapshot,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let total = positions.len();

        for (idx, position) in positions.iter().enumerate() {
            match self.process_position(position, snapshot, &mut report).await {
                Ok(PositionOutcome::Processed) => {
                    report.processed += 1;
                    self.metrics.record_position_processed();
                    self.attempts.lock().remove(&position.id);
                }
                Ok(PositionOutcome::Malformed) => {
                    report.malformed += 1;
                    self.metrics.record_position_malformed();
                    self.note_failed_attempt(position);
                }
                Err(e) => {
                    report.failed += 1;
                    report.units_halted += 1;
                    self.metrics.record_position_failed();
                    self.note_failed_attempt(position);
                    warn!(
                        unit_id = %unit_id,
                        position_id = %position.id,
                        error = %e,
                        deferred = %(total - idx - 1),
                        "unit_halted"
                    );
                    break;
                }
            }
        }

        report
    }

    /// Evaluate every zone for one position, then mark it processed
    async fn process_position(
        &self,
        position: &Position,
        snapshot: &ZoneSnapshot,
        report: &mut BatchReport,
    ) -> Result<PositionOutcome, EngineError> {
        let Some(point) = position.point() else {
            let reason = if position.lat.is_none() || position.lng.is_none() {
                "missing coordinate"
            } else {
                "coordinate out of range"
            };
            let error = EngineError::MalformedPosition { id: position.id.to_string(), reason: reason.to_string() };
            warn!(
                unit_id = %position.unit_id,
                lat = ?position.lat,
                lng = ?position.lng,
                error = %error,
                "position_malformed"
            );
            return Ok(PositionOutcome::Malformed);
        };

        debug!(position_id = %position.id, unit_id = %position.unit_id, zones = %snapshot.len(), "position_evaluate");

        // Zones touch disjoint keys, so a failure on one does not stop the others
        let mut first_error = None;
        for zone in snapshot.zones() {
            if let Err(e) = self.evaluate_zone(position, point, zone, report).await {
                warn!(
                    position_id = %position.id,
                    zone_type = %zone.zone_type,
                    zone_id = %zone.id,
                    error = %e,
                    "zone_evaluation_failed"
                );
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        with_timeout(
            "position_source",
            self.settings.call_timeout,
            self.source.mark_processed(&position.id),
        )
        .await?;
        Ok(PositionOutcome::Processed)
    }

    async fn evaluate_zone(
        &self,
        position: &Position,
        point: GeoPoint,
        zone: &Zone,
        report: &mut BatchReport,
    ) -> Result<(), EngineError> {
        let timeout = self.settings.call_timeout;
        let ts = position.timestamp;
        let key = ZoneKey::new(position.unit_id.clone(), zone.zone_type, zone.id.clone());
        let containment = zone.evaluate(point);

        let prev = with_timeout("state_store", timeout, self.states.get(&key)).await?;

        match decide(prev.as_ref(), containment.inside, ts) {
            Transition::Stale => {
                report.stale += 1;
                debug!(key = %key, position_id = %position.id, "position_stale_for_zone");
            }
            Transition::StayOutside => {}
            Transition::Enter => {
                let entered_at = match self.logged_transition(&key, ts).await? {
                    Some((EventType::Enter, logged_at)) => {
                        report.transitions_recovered += 1;
                        debug!(key = %key, entered_at = %logged_at, "enter_already_logged");
                        logged_at
                    }
                    _ => {
                        let event = ZoneEvent::new(EventType::Enter, &key, &zone.name, point, ts)
                            .with_distance(containment.distance_m);
                        self.emit(&event, report).await?;
                        ts
                    }
                };
                with_timeout(
                    "state_store",
                    timeout,
                    self.states.upsert(&key, UnitZoneState::seen_inside(entered_at, ts)),
                )
                .await?;
            }
            Transition::Exit => {
                match self.logged_transition(&key, ts).await? {
                    Some((EventType::Exit, logged_at)) => {
                        report.transitions_recovered += 1;
                        debug!(key = %key, left_at = %logged_at, "exit_already_logged");
                    }
                    _ => {
                        let event = ZoneEvent::new(EventType::Exit, &key, &zone.name, point, ts)
                            .with_distance(containment.distance_m);
                        self.emit(&event, report).await?;
                    }
                }
                with_timeout("state_store", timeout, self.states.upsert(&key, UnitZoneState::left(ts)))
                    .await?;
            }
            Transition::Stay { entered_at } => {
                if let Some(minutes) = self.settings.dwell.due(entered_at, ts) {
                    self.maybe_emit_dwell(&key, zone, point, ts, minutes, containment.distance_m, report)
                        .await?;
                }
                with_timeout(
                    "state_store",
                    timeout,
                    self.states.upsert(&key, UnitZoneState::seen_inside(entered_at, ts)),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Last enter/exit already in the log for `key`. A transition the state
    /// store missed (write failed after the append, or state lost on restart)
    /// shows up here and is repaired instead of emitted twice.
    async fn logged_transition(
        &self,
        key: &ZoneKey,
        ts: DateTime<Utc>,
    ) -> Result<Option<(EventType, DateTime<Utc>)>, EngineError> {
        with_timeout("event_sink", self.settings.call_timeout, self.emitter.last_transition(key, ts)).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn maybe_emit_dwell(
        &self,
        key: &ZoneKey,
        zone: &Zone,
        point: GeoPoint,
        ts: DateTime<Utc>,
        minutes: f64,
        distance_m: Option<f64>,
        report: &mut BatchReport,
    ) -> Result<(), EngineError> {
        let policy = &self.settings.dwell;
        let event_key = EventKey::new(key, EventType::Dwell);
        let previous = with_timeout(
            "event_sink",
            self.settings.call_timeout,
            self.emitter.recent_dwell(&event_key, policy, ts),
        )
        .await?;

        if let Some(previous) = previous.filter(|&prev| policy.suppresses(prev, ts)) {
            report.dwell_suppressed += 1;
            self.metrics.record_dwell_suppressed();
            debug!(key = %key, previous = %previous, dwell_minutes = %minutes, "dwell_suppressed");
            return Ok(());
        }

        let event = ZoneEvent::new(EventType::Dwell, key, &zone.name, point, ts)
            .with_distance(distance_m)
            .with_dwell_minutes(minutes);
        self.emit(&event, report).await
    }

    async fn emit(&self, event: &ZoneEvent, report: &mut BatchReport) -> Result<(), EngineError> {
        let id = with_timeout("event_sink", self.settings.call_timeout, self.emitter.emit(event)).await?;
        report.count_event(event.event_type);
        self.metrics.record_event(event.event_type);
        info!(
            event_id = %id,
            event_type = %event.event_type,
            unit_id = %event.unit_id,
            zone_type = %event.zone_type,
            zone_id = %event.zone_id,
            zone_name = %event.meta.zone_name,
            dwell_minutes = ?event.meta.dwell_minutes,
            "zone_event"
        );
        Ok(())
    }

    fn note_failed_attempt(&self, position: &Position) {
        let attempts = {
            let mut map = self.attempts.lock();
            let count = map.entry(position.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts == self.settings.stuck_after_attempts {
            self.metrics.record_position_stuck();
            warn!(
                position_id = %position.id,
                unit_id = %position.unit_id,
                attempts = %attempts,
                "position_stuck"
            );
        }
    }
}

/// Split a timestamp-ordered batch by unit, keeping each unit's order
fn group_by_unit(positions: Vec<Position>) -> BTreeMap<UnitId, Vec<Position>> {
    let mut groups: BTreeMap<UnitId, Vec<Position>> = BTreeMap::new();
    for position in positions {
        groups.entry(position.unit_id.clone()).or_default().push(position);
    }
    groups
}
