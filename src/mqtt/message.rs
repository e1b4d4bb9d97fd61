use std::fmt;

use tokio::sync::mpsc;

use crate::bridge::BridgeEvent;

/// Event reported by the transport for one connection session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    /// The broker acknowledged the connection
    Connected,
    Message { topic: String, payload: Vec<u8> },
    ConnectionLost { reason: String },
}

/// A publish the bridge wants to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = String::from_utf8_lossy(&self.payload).chars().take(32).collect();
        write!(f, "{} <- {}", self.topic, preview)
    }
}

/// Hands transport events to the bridge, tagged with their session
///
/// Sessions are numbered by the bridge; events of a replaced session are
/// discarded there.
#[derive(Debug, Clone)]
pub struct MqttEventSink {
    session: u64,
    tx: mpsc::Sender<BridgeEvent>,
}

impl MqttEventSink {
    pub fn new(session: u64, tx: mpsc::Sender<BridgeEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the bridge has stopped
    pub async fn send(&self, event: MqttEvent) -> bool {
        self.tx
            .send(BridgeEvent::Mqtt {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }
}
