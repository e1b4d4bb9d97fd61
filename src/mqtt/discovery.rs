//! Home Assistant discovery documents
//!
//! Documents are plain serde structs, so the field order and therefore the
//! encoded bytes are fixed for a given configuration and identity. Publishing
//! them again on every connect only refreshes the hub's view of each entity.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use super::message::OutboundMessage;
use super::topics::{TopicKind, TopicNamespace};
use super::transport::MqttTransport;
use crate::config::DeviceConfig;
use crate::error::BridgeError;
use crate::features::{payload, FeatureRegistry, FeatureSpec, Vocabulary};
use crate::identity::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    pub name: String,
    #[serde(rename = "uniq_id")]
    pub unique_id: String,
    #[serde(rename = "pl_on", skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,
    #[serde(rename = "pl_off", skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<&'static str>,
    pub icon: String,
    pub device: DeviceBlock,
    pub availability_topic: String,
    #[serde(rename = "pl_avail")]
    pub payload_available: &'static str,
    #[serde(rename = "pl_not_avail")]
    pub payload_not_available: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBlock {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
    pub identifiers: Vec<String>,
}

pub struct DiscoveryPublisher {
    namespace: TopicNamespace,
    device: DeviceConfig,
    identity: Arc<DeviceIdentity>,
}

impl DiscoveryPublisher {
    pub fn new(namespace: TopicNamespace, device: DeviceConfig, identity: Arc<DeviceIdentity>) -> Self {
        Self {
            namespace,
            device,
            identity,
        }
    }

    /// Builds the document of one feature, `None` for features without discovery data
    pub fn document(&self, spec: &FeatureSpec) -> Result<Option<DiscoveryDocument>, BridgeError> {
        let Some(descriptor) = &spec.discovery else {
            return Ok(None);
        };
        let identity = self.identity.identity();

        let command_topic = match spec.command_path {
            Some(_) => Some(self.namespace.resolve(spec.id, TopicKind::Command)?),
            None => None,
        };
        let state_topic = match spec.state_path {
            Some(_) => Some(self.namespace.resolve(spec.id, TopicKind::State)?),
            None => None,
        };
        let (payload_on, payload_off, payload_press) = match descriptor.vocabulary {
            Vocabulary::OnOff => (Some(payload::ON), Some(payload::OFF), None),
            Vocabulary::Press => (None, None, Some(payload::PRESS)),
        };

        Ok(Some(DiscoveryDocument {
            command_topic,
            state_topic,
            name: descriptor.name.to_string(),
            unique_id: format!("{}{}", identity, spec.id.as_str()),
            payload_on,
            payload_off,
            payload_press,
            icon: descriptor.icon.to_string(),
            device: DeviceBlock {
                name: self.device.name.clone(),
                model: self.device.model.clone(),
                manufacturer: self.device.manufacturer.clone(),
                sw_version: self.device.sw_version.clone(),
                identifiers: vec![identity.to_string()],
            },
            availability_topic: self.namespace.availability(),
            payload_available: payload::ONLINE,
            payload_not_available: payload::OFFLINE,
        }))
    }

    /// Encodes the retained discovery publish of every registered feature
    pub fn render(&self, registry: &FeatureRegistry) -> Result<Vec<OutboundMessage>, BridgeError> {
        let mut messages = Vec::with_capacity(registry.len());
        for spec in registry.iter() {
            let (Some(descriptor), Some(document)) = (&spec.discovery, self.document(spec)?) else {
                continue;
            };
            let topic = self.namespace.discovery(descriptor.class, &document.unique_id);
            messages.push(OutboundMessage::retained(topic, serde_json::to_vec(&document)?));
        }
        Ok(messages)
    }

    /// Publishes every discovery document, returns how many were handed to the transport
    pub fn advertise(&self, registry: &FeatureRegistry, transport: &dyn MqttTransport) -> usize {
        let messages = match self.render(registry) {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to build discovery documents: {}", e);
                return 0;
            }
        };

        let mut published = 0;
        for message in messages {
            debug!("Advertising {}", message.topic);
            match transport.publish(&message.topic, message.payload, message.retain) {
                Ok(()) => published += 1,
                Err(e) => error!("Failed to publish discovery to {}: {}", message.topic, e),
            }
        }
        info!("Advertised {} entities", published);
        published
    }
}
