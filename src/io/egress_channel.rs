//! Bounded hand-off from the emitter to the MQTT publisher
//!
//! The emitter never waits on the broker: when the queue is full the
//! notification is dropped. The durable event log already holds the event.

use crate::domain::event::ZoneEvent;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum EgressMessage {
    Event(EventPayload),
}

/// Wire form of a zone event: the event fields plus the site id
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(flatten)]
    pub event: ZoneEvent,
}

#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Queue an event for publication. Returns false when it was dropped.
    pub fn send_event(&self, event: &ZoneEvent) -> bool {
        let payload = EventPayload { site: Some(self.site_id.clone()), event: event.clone() };
        self.tx.try_send(EgressMessage::Event(payload)).is_ok()
    }
}

/// Sender/receiver pair holding at most `capacity` pending events
pub fn create_egress_channel(
    capacity: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EgressSender::new(tx, site_id), rx)
}
