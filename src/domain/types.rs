//! Shared types for the geofence engine

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for tracked unit IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for checkpoint/sector IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for raw position record IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PositionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A point on the globe in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build from a `[lng, lat]` pair as stored in sector rings
    #[inline]
    pub const fn from_lng_lat(pair: [f64; 2]) -> Self {
        Self { lat: pair[1], lng: pair[0] }
    }
}

/// Raw GPS report for a unit, created by upstream ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub unit_id: UnitId,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(rename = "ts", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
}

impl Position {
    pub fn new(
        id: impl Into<String>,
        unit_id: impl Into<String>,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PositionId(id.into()),
            unit_id: UnitId(unit_id.into()),
            lat: Some(lat),
            lng: Some(lng),
            altitude: None,
            timestamp,
            processed: false,
        }
    }

    /// Coordinates of the report, or None if either is missing or unusable
    pub fn point(&self) -> Option<GeoPoint> {
        let (lat, lng) = (self.lat?, self.lng?);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(GeoPoint::new(lat, lng))
    }
}

/// Accepts an RFC 3339 string or epoch milliseconds (integer or whole float)
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an RFC 3339 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp {value:?}: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            let ms = i64::try_from(value).map_err(|_| E::custom("epoch ms out of range"))?;
            self.visit_i64(ms)
        }

        fn visit_f64<E>(self, value: f64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            // Some producers serialize epoch ms as a float; only whole values are accepted
            if !value.is_finite() || value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
                return Err(E::custom(format!("epoch ms must be a whole number: {value}")));
            }
            self.visit_i64(value as i64)
        }

        fn visit_i64<E>(self, value: i64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            Utc.timestamp_millis_opt(value)
                .single()
                .ok_or_else(|| E::custom(format!("epoch ms out of range: {value}")))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Kind of zone a state record or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Checkpoint,
    Sector,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Checkpoint => "checkpoint",
            ZoneType::Sector => "sector",
        }
    }
}

impl std::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// Circular zone: center plus radius in meters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: ZoneId,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Checkpoint {
    pub fn new(id: &str, name: &str, lat: f64, lng: f64, radius_m: f64) -> Self {
        Self { id: ZoneId::from(id), name: name.to_string(), lat, lng, radius_m, enabled: true }
    }
}

/// Polygonal zone. `polygon[0]` is the outer ring, any further rings are holes.
/// Vertices are `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub id: ZoneId,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_rings")]
    pub polygon: Vec<Vec<[f64; 2]>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Sector {
    pub fn new(id: &str, name: &str, outer: Vec<[f64; 2]>) -> Self {
        Self { id: ZoneId::from(id), name: name.to_string(), polygon: vec![outer], enabled: true }
    }

    pub fn with_hole(mut self, hole: Vec<[f64; 2]>) -> Self {
        self.polygon.push(hole);
        self
    }
}

/// Sector geometry may be stored as a single ring or as a list of rings
fn deserialize_rings<'de, D>(deserializer: D) -> Result<Vec<Vec<[f64; 2]>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rings {
        Single(Vec<[f64; 2]>),
        Multi(Vec<Vec<[f64; 2]>>),
    }

    Ok(match Rings::deserialize(deserializer)? {
        Rings::Single(ring) => vec![ring],
        Rings::Multi(rings) => rings,
    })
}

/// Key of a per-(unit, zone) containment record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneKey {
    pub unit_id: UnitId,
    pub zone_type: ZoneType,
    pub zone_id: ZoneId,
}

impl ZoneKey {
    pub fn new(unit_id: UnitId, zone_type: ZoneType, zone_id: ZoneId) -> Self {
        Self { unit_id, zone_type, zone_id }
    }
}

impl std::fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.unit_id, self.zone_type, self.zone_id)
    }
}

/// Containment state of one unit relative to one zone
///
/// `entered_at` is Some exactly when `is_inside` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitZoneState {
    pub is_inside: bool,
    pub entered_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

impl UnitZoneState {
    /// State right after entering at `ts`
    #[inline]
    pub fn entered(ts: DateTime<Utc>) -> Self {
        Self { is_inside: true, entered_at: Some(ts), last_seen: ts }
    }

    /// State right after leaving at `ts`
    #[inline]
    pub fn left(ts: DateTime<Utc>) -> Self {
        Self { is_inside: false, entered_at: None, last_seen: ts }
    }

    /// Still inside, seen again at `ts`
    #[inline]
    pub fn seen_inside(entered_at: DateTime<Utc>, ts: DateTime<Utc>) -> Self {
        Self { is_inside: true, entered_at: Some(entered_at), last_seen: ts }
    }
}
