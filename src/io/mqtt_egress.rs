//! MQTT publisher for zone events
//!
//! Each emitted event goes out as JSON on the events topic with QoS 1.
//! Publish failures are logged here and never reach the processor.

use crate::infra::config::Config;
use crate::io::egress_channel::{EgressMessage, EventPayload};
use crate::io::mqtt::mqtt_options;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    topic: String,
}

impl MqttPublisher {
    /// Spawns the connection driver; publishing starts with `run`
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let mut options = mqtt_options(config, "events");
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, 100);
        tokio::spawn(drive_connection(eventloop));

        Self { client, rx, topic: config.mqtt_events_topic().to_string() }
    }

    /// Publish until shutdown, then flush whatever is already queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "mqtt_egress_started");

        loop {
            let msg = tokio::select! {
                _ = shutdown.changed() => {
                    if !*shutdown.borrow() {
                        continue;
                    }
                    let mut flushed = 0usize;
                    while let Ok(msg) = self.rx.try_recv() {
                        self.handle(msg).await;
                        flushed += 1;
                    }
                    info!(flushed = %flushed, "mqtt_egress_shutdown");
                    return;
                }
                msg = self.rx.recv() => msg,
            };

            match msg {
                Some(msg) => self.handle(msg).await,
                None => {
                    info!("mqtt_egress_channel_closed");
                    return;
                }
            }
        }
    }

    async fn handle(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Event(payload) => {
                if let Err(e) = self.publish_event(&payload).await {
                    error!(
                        error = %e,
                        event_id = %payload.event.id,
                        event_type = %payload.event.event_type.as_str(),
                        "mqtt_egress_event_failed"
                    );
                }
            }
        }
    }

    async fn publish_event(&self, payload: &EventPayload) -> anyhow::Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.client.publish(&self.topic, QoS::AtLeastOnce, false, body).await?;
        Ok(())
    }
}

/// Poll the event loop forever; rumqttc reconnects on the next poll after an error
async fn drive_connection(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
            Ok(Event::Incoming(Packet::PubAck(ack))) => debug!(pkid = %ack.pkid, "mqtt_egress_puback"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt_egress_connection_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
