//! Semantic zone events derived from position reports

use crate::domain::types::{GeoPoint, UnitId, ZoneId, ZoneKey, ZoneType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Event kinds the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Enter,
    Exit,
    Dwell,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Enter => "enter",
            EventType::Exit => "exit",
            EventType::Dwell => "dwell",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub zone_name: String,
    /// Distance from checkpoint center (checkpoints only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Minutes since entry (dwell events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell_minutes: Option<f64>,
}

/// Lookup key for the event log: one unit, one event type, one zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub unit_id: UnitId,
    pub event_type: EventType,
    pub zone_type: ZoneType,
    pub zone_id: ZoneId,
}

impl EventKey {
    pub fn new(zone_key: &ZoneKey, event_type: EventType) -> Self {
        Self {
            unit_id: zone_key.unit_id.clone(),
            event_type,
            zone_type: zone_key.zone_type,
            zone_id: zone_key.zone_id.clone(),
        }
    }
}

/// Append-only record of an enter/exit/dwell occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub id: String,
    pub unit_id: UnitId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub zone_type: ZoneType,
    pub zone_id: ZoneId,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub meta: EventMeta,
}

impl ZoneEvent {
    pub fn new(
        event_type: EventType,
        key: &ZoneKey,
        zone_name: &str,
        point: GeoPoint,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_uuid_v7(),
            unit_id: key.unit_id.clone(),
            event_type,
            zone_type: key.zone_type,
            zone_id: key.zone_id.clone(),
            lat: point.lat,
            lng: point.lng,
            timestamp,
            meta: EventMeta { zone_name: zone_name.to_string(), ..Default::default() },
        }
    }

    pub fn with_distance(mut self, distance_m: Option<f64>) -> Self {
        self.meta.distance_m = distance_m;
        self
    }

    pub fn with_dwell_minutes(mut self, minutes: f64) -> Self {
        self.meta.dwell_minutes = Some(minutes);
        self
    }

    /// Key used for log lookups
    pub fn key(&self) -> EventKey {
        EventKey {
            unit_id: self.unit_id.clone(),
            event_type: self.event_type,
            zone_type: self.zone_type,
            zone_id: self.zone_id.clone(),
        }
    }
}
