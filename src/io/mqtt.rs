//! MQTT intake for raw unit positions
//!
//! Subscribes to the positions topic and inserts each decoded report into the
//! `PositionQueue`. A payload is either one position object or an array of
//! them. Missing coordinates are kept; the processor decides what to do with
//! them.

use crate::domain::types::Position;
use crate::infra::config::Config;
use crate::services::position_source::PositionQueue;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Deserialize)]
#[serde(untagged)]
enum PositionMessage {
    Many(Vec<Position>),
    One(Position),
}

/// Decode a positions payload; reports are always ingested as unprocessed
pub fn parse_position_message(json_str: &str) -> Result<Vec<Position>, serde_json::Error> {
    let mut positions = match serde_json::from_str::<PositionMessage>(json_str)? {
        PositionMessage::Many(positions) => positions,
        PositionMessage::One(position) => vec![position],
    };
    for position in &mut positions {
        position.processed = false;
    }
    Ok(positions)
}

/// Connection options shared by the intake and the event publisher.
/// `role` keeps the two client ids distinct on the broker.
pub(crate) fn mqtt_options(config: &Config, role: &str) -> MqttOptions {
    let client_id = format!("geofence-{role}-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }
    options
}

/// Run the intake until shutdown
pub async fn start_position_intake(
    config: &Config,
    queue: Arc<PositionQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), rumqttc::ClientError> {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config, "intake"), 100);
    client.subscribe(config.mqtt_positions_topic(), QoS::AtLeastOnce).await?;

    info!(
        topic = %config.mqtt_positions_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_intake_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_intake_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(json_str) = std::str::from_utf8(&publish.payload) else {
                            warn!(topic = %publish.topic, "mqtt_intake_invalid_utf8");
                            continue;
                        };
                        match parse_position_message(json_str) {
                            Ok(positions) => {
                                let received = positions.len();
                                let added = queue.extend(positions);
                                debug!(received = %received, added = %added, "mqtt_intake_positions");
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_intake_decode_failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_intake_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_intake_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
