//! Broker link with statum state machine
//!
//! ```text
//! Disconnected ──dial──► Connecting ──establish──► Connected
//!      ▲   │                  │                        │
//!      │   └──────retry───────┘                        │
//!      └──────────── drop_out / lose / close ──────────┘
//! ```
//!
//! A `Link<Disconnected>` may still own a transport: after a connection loss
//! the transport keeps retrying and the next broker ack re-enters
//! `Connecting` through `retry`.

use statum::{machine, state};
use tracing::{debug, error, info};

use crate::features::payload;
use crate::mqtt::transport::MqttTransport;

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[machine]
pub struct Link<S: LinkState> {
    transport: Option<Box<dyn MqttTransport>>,
    session: u64,
}

impl<S: LinkState> Link<S> {
    pub fn session(&self) -> u64 {
        self.session
    }
}

impl Link<Disconnected> {
    pub fn idle() -> Self {
        Self::new(None, 0)
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn dial(mut self, transport: Box<dyn MqttTransport>, session: u64) -> Link<Connecting> {
        debug!("Link dialing (session {})", session);
        self.transport = Some(transport);
        self.session = session;
        self.transition()
    }

    /// Re-enters `Connecting` when the transport reconnected on its own
    pub fn retry(self) -> Result<Link<Connecting>, Self> {
        if self.transport.is_none() {
            return Err(self);
        }
        debug!("Link retrying (session {})", self.session);
        Ok(self.transition())
    }

    pub fn close(mut self, availability_topic: &str) -> Link<Disconnected> {
        shutdown(self.transport.take(), availability_topic, self.session);
        Link::idle()
    }
}

impl Link<Connecting> {
    pub fn transport(&self) -> Option<&dyn MqttTransport> {
        self.transport.as_deref()
    }

    pub fn establish(self) -> Link<Connected> {
        info!("Link established (session {})", self.session);
        self.transition()
    }

    pub fn drop_out(self) -> Link<Disconnected> {
        debug!("Connection attempt failed (session {})", self.session);
        self.transition()
    }

    pub fn close(mut self, availability_topic: &str) -> Link<Disconnected> {
        shutdown(self.transport.take(), availability_topic, self.session);
        Link::idle()
    }
}

impl Link<Connected> {
    pub fn transport(&self) -> Option<&dyn MqttTransport> {
        self.transport.as_deref()
    }

    pub fn lose(self) -> Link<Disconnected> {
        info!("Link lost (session {})", self.session);
        self.transition()
    }

    pub fn close(mut self, availability_topic: &str) -> Link<Disconnected> {
        shutdown(self.transport.take(), availability_topic, self.session);
        Link::idle()
    }
}

/// Marks the bridge offline and asks the transport to disconnect
fn shutdown(transport: Option<Box<dyn MqttTransport>>, availability_topic: &str, session: u64) {
    let Some(transport) = transport else {
        return;
    };
    if let Err(e) = transport.publish(
        availability_topic,
        payload::OFFLINE.as_bytes().to_vec(),
        true,
    ) {
        error!("Failed to publish offline state: {}", e);
    }
    if let Err(e) = transport.disconnect() {
        error!("Failed to disconnect session {}: {}", session, e);
    }
    info!("Link closed (session {})", session);
}
