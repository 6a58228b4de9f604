//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `zone_file` - Zone registry backed by a JSON file
//! - `event_log` - Durable event log (JSONL format)
//! - `state_file` - Durable per-(unit, zone) state (JSONL format)
//! - `mqtt` - MQTT intake for raw positions
//! - `mqtt_egress` - MQTT publisher for zone events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod event_log;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod state_file;
pub mod zone_file;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender, EventPayload};
pub use event_log::JsonlEventLog;
pub use mqtt_egress::MqttPublisher;
pub use state_file::JsonlStateStore;
pub use zone_file::{JsonZoneRegistry, ZoneFile};
