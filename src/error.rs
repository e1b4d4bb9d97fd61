//! Error definitions for the adapter
//!
//! Library code returns these types; only the binary wraps them into
//! `color_eyre` reports.

use thiserror::Error;

use crate::features::FeatureId;
use crate::mqtt::topics::TopicKind;

/// Errors raised while wiring or running the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or inconsistent configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A feature name from the configuration is not known
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// The same feature was registered twice during startup
    #[error("Feature {0} registered twice")]
    DuplicateFeature(FeatureId),

    /// Two handlers were registered for the same command topic
    #[error("Command topic {0} registered twice")]
    DuplicateTopic(String),

    /// The feature does not define a topic of the requested kind
    #[error("Feature {feature} has no {kind} topic")]
    UndefinedTopic { feature: FeatureId, kind: TopicKind },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The device identity could not be written back to storage
    #[error("Failed to persist device identity: {0}")]
    Persistence(String),

    #[error("Failed to encode JSON: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    /// The bridge task has stopped and no longer accepts requests
    #[error("Bridge task is not running")]
    ChannelClosed,
}

/// Errors raised by a command handler for a single MQTT message
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Payload {payload:?} is unknown for {feature}")]
    UnknownPayload { feature: FeatureId, payload: String },

    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Utterance is empty")]
    EmptyUtterance,
}

/// Errors raised by the MQTT transport collaborator
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker settings: {0}")]
    InvalidSettings(String),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("No async runtime available: {0}")]
    Runtime(String),
}

/// Errors raised by the message bus collaborator
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Failed to encode bus message: {0}")]
    Encode(#[from] serde_json::Error),
}
