//! Feature table and startup registry
//!
//! Every exposed entity is described by one [`FeatureSpec`] record: the topic
//! suffixes it owns and how it is announced to the hub. The records are plain
//! data; behaviour lives in the router handlers and the sync rules.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::BridgeError;

/// Payload tokens shared by every feature
pub mod payload {
    pub const ON: &str = "ON";
    pub const OFF: &str = "OFF";
    pub const ONLINE: &str = "ONLINE";
    pub const OFFLINE: &str = "OFFLINE";
    pub const PRESS: &str = "PRESS";
}

/// Identifier of an exposed feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureId {
    MicMute,
    VolumeMute,
    Speaking,
    Listening,
    ListenButton,
    Command,
}

impl FeatureId {
    pub const ALL: [FeatureId; 6] = [
        FeatureId::MicMute,
        FeatureId::VolumeMute,
        FeatureId::Speaking,
        FeatureId::Listening,
        FeatureId::ListenButton,
        FeatureId::Command,
    ];

    /// Stable name, also used as unique-id suffix in discovery documents
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureId::MicMute => "mic_mute",
            FeatureId::VolumeMute => "vol_mute",
            FeatureId::Speaking => "speaking",
            FeatureId::Listening => "listening",
            FeatureId::ListenButton => "listen_button",
            FeatureId::Command => "command",
        }
    }

    pub fn spec(self) -> FeatureSpec {
        match self {
            FeatureId::MicMute => FeatureSpec {
                id: self,
                command_path: Some("mic_mute/set"),
                state_path: Some("mic_mute/state"),
                discovery: Some(DiscoveryDescriptor {
                    class: EntityClass::Switch,
                    name: "Mycroft Mic Muted",
                    icon: "mdi:microphone-off",
                    vocabulary: Vocabulary::OnOff,
                }),
            },
            FeatureId::VolumeMute => FeatureSpec {
                id: self,
                command_path: Some("vol_mute/set"),
                state_path: Some("vol_mute/state"),
                discovery: Some(DiscoveryDescriptor {
                    class: EntityClass::Switch,
                    name: "Mycroft Speaker Muted",
                    icon: "mdi:volume-off",
                    vocabulary: Vocabulary::OnOff,
                }),
            },
            FeatureId::Speaking => FeatureSpec {
                id: self,
                command_path: None,
                state_path: Some("speaking/state"),
                discovery: Some(DiscoveryDescriptor {
                    class: EntityClass::BinarySensor,
                    name: "Mycroft Is Speaking",
                    icon: "mdi:account-voice",
                    vocabulary: Vocabulary::OnOff,
                }),
            },
            FeatureId::Listening => FeatureSpec {
                id: self,
                command_path: None,
                state_path: Some("listening/state"),
                discovery: Some(DiscoveryDescriptor {
                    class: EntityClass::BinarySensor,
                    name: "Mycroft Is Listening",
                    icon: "mdi:ear-hearing",
                    vocabulary: Vocabulary::OnOff,
                }),
            },
            FeatureId::ListenButton => FeatureSpec {
                id: self,
                command_path: Some("listen_button"),
                state_path: None,
                discovery: Some(DiscoveryDescriptor {
                    class: EntityClass::Button,
                    name: "Mycroft Listen Command",
                    icon: "mdi:record-rec",
                    vocabulary: Vocabulary::Press,
                }),
            },
            FeatureId::Command => FeatureSpec {
                id: self,
                command_path: Some("command"),
                state_path: None,
                discovery: None,
            },
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        FeatureId::ALL
            .into_iter()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| BridgeError::UnknownFeature(name.to_string()))
    }
}

/// Home Assistant entity component a feature is announced as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityClass {
    Switch,
    BinarySensor,
    Button,
}

impl EntityClass {
    pub fn component(self) -> &'static str {
        match self {
            EntityClass::Switch => "switch",
            EntityClass::BinarySensor => "binary_sensor",
            EntityClass::Button => "button",
        }
    }
}

/// Payload tokens a feature understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    OnOff,
    Press,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDescriptor {
    pub class: EntityClass,
    pub name: &'static str,
    pub icon: &'static str,
    pub vocabulary: Vocabulary,
}

/// Topic suffixes and discovery data of one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    pub id: FeatureId,
    pub command_path: Option<&'static str>,
    pub state_path: Option<&'static str>,
    pub discovery: Option<DiscoveryDescriptor>,
}

/// Binary state published on a state topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_payload(self) -> &'static str {
        match self {
            SwitchState::On => payload::ON,
            SwitchState::Off => payload::OFF,
        }
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

/// Registered features in registration order
///
/// Filled once while the bridge is wired and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    features: Vec<FeatureSpec>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: &[FeatureId]) -> Result<Self, BridgeError> {
        let mut registry = Self::new();
        for id in ids {
            registry.register(id.spec())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: FeatureSpec) -> Result<(), BridgeError> {
        if self.contains(spec.id) {
            return Err(BridgeError::DuplicateFeature(spec.id));
        }
        debug!("Registering feature {}", spec.id);
        self.features.push(spec);
        Ok(())
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.features.iter().any(|spec| spec.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
