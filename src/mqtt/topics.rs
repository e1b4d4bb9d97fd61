use std::fmt;

use crate::error::BridgeError;
use crate::features::{EntityClass, FeatureId};

pub const DEFAULT_PREFIX: &str = "mycroft";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
const AVAILABILITY_PATH: &str = "available";

/// Kind of per-feature topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Command,
    State,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Command => f.write_str("command"),
            TopicKind::State => f.write_str("state"),
        }
    }
}

/// Computes every topic the bridge reads or writes
///
/// The root is fixed at construction: `prefix`, or `prefix/subtopic` when a
/// non-empty sub-identifier is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    root: String,
    discovery_prefix: String,
}

impl TopicNamespace {
    pub fn new(prefix: &str, subtopic: Option<&str>, discovery_prefix: &str) -> Self {
        let root = match subtopic.map(str::trim).filter(|sub| !sub.is_empty()) {
            Some(sub) => format!("{}/{}", prefix, sub),
            None => prefix.to_string(),
        };
        Self {
            root,
            discovery_prefix: discovery_prefix.to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    pub fn resolve(&self, feature: FeatureId, kind: TopicKind) -> Result<String, BridgeError> {
        let spec = feature.spec();
        let path = match kind {
            TopicKind::Command => spec.command_path,
            TopicKind::State => spec.state_path,
        };
        path.map(|path| self.join(path))
            .ok_or(BridgeError::UndefinedTopic { feature, kind })
    }

    pub fn availability(&self) -> String {
        self.join(AVAILABILITY_PATH)
    }

    pub fn discovery(&self, class: EntityClass, unique_id: &str) -> String {
        format!(
            "{}/{}/{}/config",
            self.discovery_prefix,
            class.component(),
            unique_id
        )
    }

    fn join(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }
}

impl Default for TopicNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, None, DEFAULT_DISCOVERY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_without_subtopic() {
        let ns = TopicNamespace::default();
        assert_eq!(ns.root(), "mycroft");
        assert_eq!(
            ns.resolve(FeatureId::MicMute, TopicKind::Command).unwrap(),
            "mycroft/mic_mute/set"
        );
        assert_eq!(ns.availability(), "mycroft/available");
    }

    #[test]
    fn empty_subtopic_appends_nothing() {
        assert_eq!(TopicNamespace::new("mycroft", Some(""), "ha").root(), "mycroft");
        assert_eq!(TopicNamespace::new("mycroft", Some("  "), "ha").root(), "mycroft");
    }

    #[test]
    fn subtopic_extends_root() {
        let ns = TopicNamespace::new("mycroft", Some("kitchen"), "homeassistant");
        assert_eq!(
            ns.resolve(FeatureId::Speaking, TopicKind::State).unwrap(),
            "mycroft/kitchen/speaking/state"
        );
        assert_eq!(ns.availability(), "mycroft/kitchen/available");
    }

    #[test]
    fn resolves_every_defined_pair() {
        let ns = TopicNamespace::default();
        let cases = [
            (FeatureId::MicMute, TopicKind::State, "mycroft/mic_mute/state"),
            (FeatureId::VolumeMute, TopicKind::Command, "mycroft/vol_mute/set"),
            (FeatureId::VolumeMute, TopicKind::State, "mycroft/vol_mute/state"),
            (FeatureId::Listening, TopicKind::State, "mycroft/listening/state"),
            (FeatureId::ListenButton, TopicKind::Command, "mycroft/listen_button"),
            (FeatureId::Command, TopicKind::Command, "mycroft/command"),
        ];
        for (feature, kind, expected) in cases {
            let first = ns.resolve(feature, kind).unwrap();
            assert_eq!(first, expected);
            assert_eq!(ns.resolve(feature, kind).unwrap(), first);
        }
    }

    #[test]
    fn undefined_pair_is_a_configuration_error() {
        let ns = TopicNamespace::default();
        let err = ns.resolve(FeatureId::Speaking, TopicKind::Command).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UndefinedTopic {
                feature: FeatureId::Speaking,
                kind: TopicKind::Command
            }
        ));
        assert!(ns.resolve(FeatureId::Command, TopicKind::State).is_err());
    }

    #[test]
    fn discovery_topic_layout() {
        let ns = TopicNamespace::default();
        assert_eq!(
            ns.discovery(EntityClass::BinarySensor, "42speaking"),
            "homeassistant/binary_sensor/42speaking/config"
        );
    }
}
