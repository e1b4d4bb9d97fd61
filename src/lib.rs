//! Mycroft message bus ↔ MQTT bridge with Home Assistant discovery
//!
//! ```text
//! src/
//! ├── bridge/      - orchestrator, link state machine, state sync, command handlers
//! ├── bus/         - bus message model, local and websocket buses
//! ├── mqtt/        - topics, discovery, routing, rumqttc transport
//! ├── config.rs    - TOML configuration file
//! ├── identity.rs  - stable device identity
//! ├── features.rs  - feature catalogue and registry
//! └── error.rs
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod features;
pub mod identity;
pub mod mqtt;

pub use bridge::{Bridge, BridgeHandle, BridgeSettings, BridgeStatus};
pub use config::BridgeConfig;
pub use error::BridgeError;
