//! Services - engine logic and state
//!
//! This module contains the core services:
//! - `zone_registry` - Active zone definitions and per-batch snapshots
//! - `state_store` - Per-(unit, zone) containment state
//! - `emitter` - Event sink, emitter and dwell suppression policy
//! - `position_source` - Unprocessed position selection and marking
//! - `processor` - Batch orchestration and the transition state machine

pub mod emitter;
pub mod position_source;
pub mod processor;
pub mod state_store;
pub mod zone_registry;

// Re-export commonly used types
pub use emitter::{DwellPolicy, EventEmitter, EventSink, InMemoryEventLog};
pub use position_source::{PositionQueue, PositionSource};
pub use processor::{BatchReport, PositionProcessor, ProcessorSettings};
pub use state_store::{InMemoryStateStore, UnitStateStore};
pub use zone_registry::{InMemoryZoneRegistry, ZoneRegistry, ZoneSnapshot};
