//! # MQTT side of the bridge
//!
//! Everything that knows about topics, payload encoding or the broker lives
//! here. The bridge module composes these pieces; none of them holds
//! connection state of its own.
//!
//! ```text
//! mqtt/
//! ├── config.rs     - resolved broker settings and the last-will
//! ├── topics.rs     - topic namespace (root, per-feature topics, discovery)
//! ├── discovery.rs  - Home Assistant discovery documents
//! ├── router.rs     - command topic → handler dispatch with error isolation
//! ├── message.rs    - transport events and outbound publishes
//! └── transport.rs  - transport traits and the rumqttc implementation
//! ```

pub mod config;
pub mod discovery;
pub mod message;
pub mod router;
pub mod topics;
pub mod transport;

pub use config::{LastWill, SessionSettings};
pub use discovery::DiscoveryPublisher;
pub use message::{MqttEvent, MqttEventSink, OutboundMessage};
pub use router::{CommandRouter, Dispatch};
pub use topics::{TopicKind, TopicNamespace};
pub use transport::{Connector, MqttTransport, RumqttConnector};
