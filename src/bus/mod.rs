//! # Message bus collaborator
//!
//! The assistant exchanges JSON messages of the shape
//! `{"type": ..., "data": {...}, "context": {...}}`. The bridge only needs two
//! primitives from the bus: emit a message and listen for a message type.
//!
//! ```text
//! bus/
//! ├── local.rs      - in-process bus, used for embedding and tests
//! └── websocket.rs  - client of the assistant's websocket message bus
//! ```
//!
//! Listeners are plain callbacks. The bridge registers listeners that only
//! enqueue the message for its own task, so callbacks never touch bridge state.

pub mod local;
pub mod websocket;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::BusError;

pub use local::LocalBus;
pub use websocket::WebSocketBus;

/// Message types the bridge consumes or emits
pub mod events {
    pub const MIC_GET_STATUS: &str = "mycroft.mic.get_status";
    pub const MIC_STATUS_RESPONSE: &str = "mycroft.mic.get_status.response";
    pub const MIC_MUTE: &str = "mycroft.mic.mute";
    pub const MIC_UNMUTE: &str = "mycroft.mic.unmute";
    pub const MIC_LISTEN: &str = "mycroft.mic.listen";
    pub const VOLUME_MUTE: &str = "mycroft.volume.mute";
    pub const VOLUME_UNMUTE: &str = "mycroft.volume.unmute";
    pub const VOLUME_DUCK: &str = "mycroft.volume.duck";
    pub const VOLUME_UNDUCK: &str = "mycroft.volume.unduck";
    pub const AUDIO_OUTPUT_START: &str = "recognizer_loop:audio_output_start";
    pub const AUDIO_OUTPUT_END: &str = "recognizer_loop:audio_output_end";
    pub const RECORD_BEGIN: &str = "recognizer_loop:record_begin";
    pub const RECORD_END: &str = "recognizer_loop:record_end";
    pub const UTTERANCE: &str = "recognizer_loop:utterance";
}

/// Envelope of a bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default = "empty_object")]
    pub context: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: empty_object(),
            context: empty_object(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Callback invoked for every message of a subscribed type
pub type BusListener = Arc<dyn Fn(&Message) + Send + Sync>;

pub trait MessageBus: Send + Sync {
    fn emit(&self, message: Message) -> Result<(), BusError>;

    fn on(&self, msg_type: &str, listener: BusListener) -> Result<(), BusError>;
}

/// Listener table shared by the bus implementations
#[derive(Default, Clone)]
pub struct ListenerTable {
    listeners: Arc<RwLock<HashMap<String, Vec<BusListener>>>>,
}

impl ListenerTable {
    pub fn add(&self, msg_type: &str, listener: BusListener) {
        self.listeners
            .write()
            .entry(msg_type.to_string())
            .or_default()
            .push(listener);
    }

    /// Calls every listener of the message type, returns how many were called
    pub fn dispatch(&self, message: &Message) -> usize {
        // Listeners may emit again, so the lock is released before calling them
        let targets: Vec<BusListener> = self
            .listeners
            .read()
            .get(&message.msg_type)
            .cloned()
            .unwrap_or_default();
        trace!(
            "Dispatching {} to {} listener(s)",
            message.msg_type,
            targets.len()
        );
        for listener in &targets {
            listener(message);
        }
        targets.len()
    }
}
