//! State synchronization between bus and broker
//!
//! Owns the broker link and the shadow of every state topic. Bus events are
//! turned into retained publishes through a fixed rule table; connection
//! callbacks drive the link through its states and run the announce sequence.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::link::{Connected, Connecting, Disconnected, Link};
use crate::bus::{events, Message};
use crate::error::BridgeError;
use crate::features::{payload, FeatureId, FeatureRegistry, SwitchState};
use crate::mqtt::config::{LastWill, SessionSettings};
use crate::mqtt::discovery::DiscoveryPublisher;
use crate::mqtt::message::MqttEventSink;
use crate::mqtt::topics::{TopicKind, TopicNamespace};
use crate::mqtt::transport::{Connector, MqttTransport};

/// Connection state as reported to callers
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Maps one bus message type to the state of one feature
#[derive(Clone, Copy)]
pub struct StateRule {
    pub event: &'static str,
    pub feature: FeatureId,
    pub derive: fn(&Message) -> Option<SwitchState>,
}

pub fn state_rules() -> Vec<StateRule> {
    vec![
        StateRule {
            event: events::MIC_STATUS_RESPONSE,
            feature: FeatureId::MicMute,
            derive: mic_status,
        },
        StateRule {
            event: events::VOLUME_DUCK,
            feature: FeatureId::VolumeMute,
            derive: |_| Some(SwitchState::On),
        },
        StateRule {
            event: events::VOLUME_UNDUCK,
            feature: FeatureId::VolumeMute,
            derive: |_| Some(SwitchState::Off),
        },
        StateRule {
            event: events::AUDIO_OUTPUT_START,
            feature: FeatureId::Speaking,
            derive: |_| Some(SwitchState::On),
        },
        StateRule {
            event: events::AUDIO_OUTPUT_END,
            feature: FeatureId::Speaking,
            derive: |_| Some(SwitchState::Off),
        },
        StateRule {
            event: events::RECORD_BEGIN,
            feature: FeatureId::Listening,
            derive: |_| Some(SwitchState::On),
        },
        StateRule {
            event: events::RECORD_END,
            feature: FeatureId::Listening,
            derive: |_| Some(SwitchState::Off),
        },
    ]
}

fn mic_status(message: &Message) -> Option<SwitchState> {
    match message.data.get("muted").and_then(Value::as_bool) {
        Some(muted) => Some(SwitchState::from(muted)),
        None => {
            warn!("Mic status response without boolean 'muted': {}", message.data);
            None
        }
    }
}

/// Last value of a state topic and whether the broker has seen it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowEntry {
    pub value: SwitchState,
    pub published: bool,
}

enum Connection {
    Disconnected(Link<Disconnected>),
    Connecting(Link<Connecting>),
    Connected(Link<Connected>),
}

impl Connection {
    fn state(&self) -> ConnectionState {
        match self {
            Connection::Disconnected(_) => ConnectionState::Disconnected,
            Connection::Connecting(_) => ConnectionState::Connecting,
            Connection::Connected(_) => ConnectionState::Connected,
        }
    }

    fn session(&self) -> u64 {
        match self {
            Connection::Disconnected(link) => link.session(),
            Connection::Connecting(link) => link.session(),
            Connection::Connected(link) => link.session(),
        }
    }
}

pub struct StateSyncEngine {
    namespace: TopicNamespace,
    rules: Vec<StateRule>,
    state_topics: BTreeMap<FeatureId, String>,
    shadow: BTreeMap<FeatureId, ShadowEntry>,
    connection: Connection,
}

impl StateSyncEngine {
    pub fn new(namespace: TopicNamespace, registry: &FeatureRegistry) -> Result<Self, BridgeError> {
        let mut state_topics = BTreeMap::new();
        for spec in registry.iter().filter(|spec| spec.state_path.is_some()) {
            state_topics.insert(spec.id, namespace.resolve(spec.id, TopicKind::State)?);
        }

        let rules: Vec<StateRule> = state_rules()
            .into_iter()
            .filter(|rule| state_topics.contains_key(&rule.feature))
            .collect();

        // Volume and activity sensors start idle; the mic state is queried from the bus
        let shadow = [FeatureId::VolumeMute, FeatureId::Speaking, FeatureId::Listening]
            .into_iter()
            .filter(|id| state_topics.contains_key(id))
            .map(|id| {
                let entry = ShadowEntry {
                    value: SwitchState::Off,
                    published: false,
                };
                (id, entry)
            })
            .collect();

        Ok(Self {
            namespace,
            rules,
            state_topics,
            shadow,
            connection: Connection::Disconnected(Link::<Disconnected>::idle()),
        })
    }

    /// Bus message types the engine needs to hear about
    pub fn subscribed_events(&self) -> BTreeSet<&'static str> {
        self.rules.iter().map(|rule| rule.event).collect()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Session of the current link, 0 when no transport is open
    pub fn session(&self) -> u64 {
        self.connection.session()
    }

    pub fn shadow(&self, feature: FeatureId) -> Option<SwitchState> {
        self.shadow.get(&feature).map(|entry| entry.value)
    }

    pub fn shadow_entries(&self) -> &BTreeMap<FeatureId, ShadowEntry> {
        &self.shadow
    }

    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.namespace.availability(),
            payload: payload::OFFLINE.to_string(),
            retain: true,
        }
    }

    /// Disconnected → Connecting; a failure leaves the link disconnected
    pub fn setup(
        &mut self,
        connector: &mut dyn Connector,
        settings: &SessionSettings,
        sink: MqttEventSink,
    ) -> ConnectionState {
        self.teardown();
        // A new session may reach a broker that never saw the current values
        for entry in self.shadow.values_mut() {
            entry.published = false;
        }

        let session = sink.session();
        match connector.connect(settings, &self.last_will(), sink) {
            Ok(transport) => {
                let link = Link::<Disconnected>::idle().dial(transport, session);
                self.connection = Connection::Connecting(link);
            }
            Err(e) => error!("Failed to start MQTT session {}: {}", session, e),
        }
        self.state()
    }

    /// Connecting → Connected: advertise, subscribe, go online, flush pending state
    pub fn on_connected(
        &mut self,
        discovery: Option<(&DiscoveryPublisher, &FeatureRegistry)>,
        command_topics: &[String],
    ) {
        let link = match self.take_connection() {
            Connection::Connecting(link) => link.establish(),
            Connection::Disconnected(link) => match link.retry() {
                Ok(link) => link.establish(),
                Err(link) => {
                    warn!("Broker acknowledged a session that is already closed");
                    self.connection = Connection::Disconnected(link);
                    return;
                }
            },
            Connection::Connected(link) => {
                debug!("Repeated broker acknowledgement, announcing again");
                link
            }
        };

        if let Some(transport) = link.transport() {
            announce(
                transport,
                discovery,
                command_topics,
                &self.namespace.availability(),
            );
            flush(transport, &self.state_topics, &mut self.shadow);
        }
        info!("Connected to MQTT broker (session {})", link.session());
        self.connection = Connection::Connected(link);
    }

    /// Connection dropped; the transport keeps retrying
    pub fn on_connection_lost(&mut self) {
        self.connection = match self.take_connection() {
            Connection::Connecting(link) => Connection::Disconnected(link.drop_out()),
            Connection::Connected(link) => Connection::Disconnected(link.lose()),
            disconnected => disconnected,
        };
    }

    /// Publishes OFFLINE and closes the transport, whatever the current state
    pub fn teardown(&mut self) {
        let availability = self.namespace.availability();
        let link = match self.take_connection() {
            Connection::Disconnected(link) if !link.has_transport() => link,
            Connection::Disconnected(link) => link.close(&availability),
            Connection::Connecting(link) => link.close(&availability),
            Connection::Connected(link) => link.close(&availability),
        };
        self.connection = Connection::Disconnected(link);
    }

    /// Applies a bus message to the shadow, returns the number of publishes
    pub fn apply(&mut self, message: &Message) -> usize {
        let transport = match &self.connection {
            Connection::Connected(link) => link.transport(),
            _ => None,
        };

        let mut published = 0;
        for rule in self.rules.iter().filter(|rule| rule.event == message.msg_type) {
            let Some(value) = (rule.derive)(message) else {
                continue;
            };
            let Some(topic) = self.state_topics.get(&rule.feature) else {
                continue;
            };

            let mut entry = ShadowEntry {
                value,
                published: false,
            };
            match transport {
                Some(transport) => {
                    match transport.publish(topic, value.as_payload().as_bytes().to_vec(), true) {
                        Ok(()) => {
                            entry.published = true;
                            published += 1;
                            debug!("{} is now {}", rule.feature, value.as_payload());
                        }
                        Err(e) => error!("Failed to publish {} state: {}", rule.feature, e),
                    }
                }
                None => debug!(
                    "{} is now {}, publishing once connected",
                    rule.feature,
                    value.as_payload()
                ),
            }
            self.shadow.insert(rule.feature, entry);
        }
        published
    }

    fn take_connection(&mut self) -> Connection {
        std::mem::replace(
            &mut self.connection,
            Connection::Disconnected(Link::<Disconnected>::idle()),
        )
    }
}

/// Discovery strictly before subscriptions, subscriptions before ONLINE
fn announce(
    transport: &dyn MqttTransport,
    discovery: Option<(&DiscoveryPublisher, &FeatureRegistry)>,
    command_topics: &[String],
    availability_topic: &str,
) {
    if let Some((publisher, registry)) = discovery {
        publisher.advertise(registry, transport);
    }

    for topic in command_topics {
        match transport.subscribe(topic) {
            Ok(()) => debug!("Subscribed to {}", topic),
            Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
        }
    }

    if let Err(e) = transport.publish(availability_topic, payload::ONLINE.as_bytes().to_vec(), true) {
        error!("Failed to publish online state: {}", e);
    }
}

fn flush(
    transport: &dyn MqttTransport,
    state_topics: &BTreeMap<FeatureId, String>,
    shadow: &mut BTreeMap<FeatureId, ShadowEntry>,
) {
    for (feature, entry) in shadow.iter_mut().filter(|(_, entry)| !entry.published) {
        let Some(topic) = state_topics.get(feature) else {
            continue;
        };
        match transport.publish(topic, entry.value.as_payload().as_bytes().to_vec(), true) {
            Ok(()) => entry.published = true,
            Err(e) => error!("Failed to publish pending {} state: {}", feature, e),
        }
    }
}
