use std::time::Duration;

use crate::error::TransportError;

/// Resolved broker settings for one connection session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// Pause between reconnection attempts of the transport
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() {
            return Err(TransportError::InvalidSettings("broker host is empty".into()));
        }
        if self.port == 0 {
            return Err(TransportError::InvalidSettings("broker port is 0".into()));
        }
        if self.client_id.is_empty() {
            return Err(TransportError::InvalidSettings("client id is empty".into()));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(TransportError::InvalidSettings(
                "keep-alive must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            username: None,
            password: None,
            client_id: "mycroft_mqtt_adapter".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Broker-held message published when the connection drops uncleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}
