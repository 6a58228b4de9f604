//! Domain models - core geofence types and the geometry kernel
//!
//! This module contains the canonical data types used throughout the system:
//! - `Position` - raw GPS report for a unit
//! - `Checkpoint` / `Sector` - zone definitions as stored externally
//! - `Zone` - a validated zone ready for evaluation
//! - `UnitZoneState` - containment state per (unit, zone)
//! - `ZoneEvent` - enter/exit/dwell events

pub mod event;
pub mod geometry;
pub mod types;
pub mod zone;

// Re-export commonly used types at module level
pub use event::{EventKey, EventType, ZoneEvent};
pub use types::{
    Checkpoint, GeoPoint, Position, PositionId, Sector, UnitId, UnitZoneState, ZoneId, ZoneKey,
    ZoneType,
};
pub use zone::{Containment, Zone};
