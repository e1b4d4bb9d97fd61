//! # Bridge orchestrator
//!
//! Wires the bus, the command router and the state sync engine together and
//! serializes everything through one queue. Bus listeners, transport sessions
//! and [`BridgeHandle`] callers only ever enqueue a [`BridgeEvent`]; the bridge
//! task is the single owner of the link and the shadow state.
//!
//! ```text
//! bridge/
//! ├── mod.rs       - event queue, lifecycle, handle
//! ├── link.rs      - statum state machine of the broker link
//! ├── sync.rs      - bus events → retained state, announce sequence
//! └── commands.rs  - MQTT payloads → bus messages
//! ```

pub mod commands;
pub mod link;
pub mod sync;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{events, Message, MessageBus};
use crate::config::{BridgeConfig, DeviceConfig};
use crate::error::BridgeError;
use crate::features::{FeatureId, FeatureRegistry, SwitchState};
use crate::identity::DeviceIdentity;
use crate::mqtt::config::SessionSettings;
use crate::mqtt::discovery::DiscoveryPublisher;
use crate::mqtt::message::{MqttEvent, MqttEventSink};
use crate::mqtt::router::{CommandRouter, Dispatch};
use crate::mqtt::topics::{TopicKind, TopicNamespace};
use crate::mqtt::transport::Connector;

pub use sync::{ConnectionState, StateSyncEngine};

const QUEUE_CAPACITY: usize = 256;

macro_rules! respond {
    ($reply:expr, $value:expr) => {
        if $reply.send($value).is_err() {
            warn!("Requester went away before the response was sent");
        }
    };
}

/// Everything the bridge task reacts to
#[derive(Debug)]
pub enum BridgeEvent {
    Bus(Message),
    Mqtt {
        session: u64,
        event: MqttEvent,
    },
    Reconfigure {
        settings: BridgeSettings,
        done: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<BridgeStatus>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Settings that can change at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub session: SessionSettings,
    pub advertise: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            advertise: true,
        }
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            session: config.session_settings(),
            advertise: config.discovery.advertise_sensors,
        }
    }
}

/// Everything fixed for the lifetime of a bridge
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub namespace: TopicNamespace,
    pub features: Vec<FeatureId>,
    pub device: DeviceConfig,
    /// Language attached to injected utterances
    pub lang: String,
    pub settings: BridgeSettings,
}

impl BridgeOptions {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let features = config
            .features
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<FeatureId>, _>>()?;
        Ok(Self {
            namespace: config.namespace(),
            features,
            device: config.device.clone(),
            lang: config.bus.lang.clone(),
            settings: BridgeSettings::from(config),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    pub session: u64,
    pub shadow: BTreeMap<FeatureId, SwitchState>,
    pub messages_received: usize,
    pub commands_handled: usize,
    pub commands_rejected: usize,
    pub states_published: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Cloneable front end of a running bridge
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeEvent>,
}

impl BridgeHandle {
    /// Replaces broker settings and reconnects; resolves once the new session is set up
    pub async fn reconfigure(&self, settings: BridgeSettings) -> Result<(), BridgeError> {
        let (done, rx) = oneshot::channel();
        self.request(BridgeEvent::Reconfigure { settings, done }).await?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.request(BridgeEvent::Status { reply }).await?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Publishes OFFLINE, disconnects and stops the bridge task
    ///
    /// Resolves after the transport delivered the disconnect.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        let (done, rx) = oneshot::channel();
        self.request(BridgeEvent::Shutdown { done }).await?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    async fn request(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        self.tx.send(event).await.map_err(|_| BridgeError::ChannelClosed)
    }
}

pub struct Bridge {
    registry: FeatureRegistry,
    router: CommandRouter,
    sync: StateSyncEngine,
    discovery: DiscoveryPublisher,
    bus: Arc<dyn MessageBus>,
    connector: Box<dyn Connector>,
    settings: BridgeSettings,
    status: BridgeStatus,
    session: u64,
    events: mpsc::Sender<BridgeEvent>,
    inbox: mpsc::Receiver<BridgeEvent>,
}

impl Bridge {
    pub fn new(
        options: BridgeOptions,
        identity: Arc<DeviceIdentity>,
        bus: Arc<dyn MessageBus>,
        connector: Box<dyn Connector>,
    ) -> Result<Self, BridgeError> {
        let BridgeOptions {
            namespace,
            features,
            device,
            lang,
            settings,
        } = options;

        let registry = FeatureRegistry::from_ids(&features)?;

        let mut router = CommandRouter::new();
        for spec in registry.iter().filter(|spec| spec.command_path.is_some()) {
            let topic = namespace.resolve(spec.id, TopicKind::Command)?;
            let handler = commands::handler_for(spec.id, &lang).ok_or_else(|| {
                BridgeError::Config(format!("{} has a command topic but no handler", spec.id))
            })?;
            router.register_handler(topic, spec.id, handler)?;
        }

        let sync = StateSyncEngine::new(namespace.clone(), &registry)?;
        let discovery = DiscoveryPublisher::new(namespace, device, identity);

        let (events, inbox) = mpsc::channel(QUEUE_CAPACITY);
        for msg_type in sync.subscribed_events() {
            let tx = events.clone();
            bus.on(
                msg_type,
                Arc::new(move |message: &Message| {
                    if let Err(e) = tx.try_send(BridgeEvent::Bus(message.clone())) {
                        error!("Dropping bus message {}: {}", message.msg_type, e);
                    }
                }),
            )?;
        }

        info!(
            "Bridge set up with {} feature(s), {} command topic(s)",
            registry.len(),
            router.len()
        );

        Ok(Self {
            registry,
            router,
            sync,
            discovery,
            bus,
            connector,
            settings,
            status: BridgeStatus::default(),
            session: 0,
            events,
            inbox,
        })
    }

    pub fn from_config(
        config: &BridgeConfig,
        identity: Arc<DeviceIdentity>,
        bus: Arc<dyn MessageBus>,
        connector: Box<dyn Connector>,
    ) -> Result<Self, BridgeError> {
        Self::new(BridgeOptions::from_config(config)?, identity, bus, connector)
    }

    pub fn spawn(self) -> (BridgeHandle, JoinHandle<()>) {
        let handle = BridgeHandle {
            tx: self.events.clone(),
        };
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    async fn run(mut self) {
        if self.registry.contains(FeatureId::MicMute) {
            if let Err(e) = self.bus.emit(Message::new(events::MIC_GET_STATUS)) {
                error!("Failed to query mic status: {}", e);
            }
        }
        self.connect();

        while let Some(event) = self.inbox.recv().await {
            match event {
                BridgeEvent::Bus(message) => {
                    trace!("Bus event {}", message.msg_type);
                    self.status.states_published += self.sync.apply(&message);
                }
                BridgeEvent::Mqtt { session, event } => self.on_mqtt_event(session, event),
                BridgeEvent::Reconfigure { settings, done } => {
                    self.reconfigure(settings).await;
                    respond!(done, ());
                }
                BridgeEvent::Status { reply } => {
                    respond!(reply, self.snapshot());
                }
                BridgeEvent::Shutdown { done } => {
                    info!("Shutting down bridge");
                    self.sync.teardown();
                    self.connector.drain().await;
                    respond!(done, ());
                    break;
                }
            }
        }
        debug!("Bridge task finished");
    }

    /// Opens a fresh transport session, closing the current one first
    fn connect(&mut self) {
        self.session += 1;
        let sink = MqttEventSink::new(self.session, self.events.clone());
        let state = self
            .sync
            .setup(self.connector.as_mut(), &self.settings.session, sink);
        debug!("Session {} is {:?}", self.session, state);
    }

    /// The old session has flushed OFFLINE before the new one dials
    async fn reconfigure(&mut self, settings: BridgeSettings) {
        info!(
            "Reconfiguring MQTT connection to {}:{}",
            settings.session.host, settings.session.port
        );
        self.settings = settings;
        self.sync.teardown();
        self.connector.drain().await;
        self.connect();
    }

    fn on_mqtt_event(&mut self, session: u64, event: MqttEvent) {
        if session != self.sync.session() {
            debug!("Ignoring {:?} from stale session {}", event, session);
            return;
        }

        match event {
            MqttEvent::Connected => {
                let topics: Vec<String> = self.router.topics().map(str::to_string).collect();
                let discovery = self
                    .settings
                    .advertise
                    .then_some((&self.discovery, &self.registry));
                self.sync.on_connected(discovery, &topics);
            }
            MqttEvent::Message { topic, payload } => {
                self.status.messages_received += 1;
                self.status.last_activity = Some(Local::now());
                match self.router.dispatch(&topic, &payload, self.bus.as_ref()) {
                    Dispatch::Handled(_) => self.status.commands_handled += 1,
                    Dispatch::Rejected => self.status.commands_rejected += 1,
                    Dispatch::Ignored => {}
                }
            }
            MqttEvent::ConnectionLost { reason } => {
                warn!("MQTT connection lost: {}", reason);
                self.sync.on_connection_lost();
            }
        }
    }

    fn snapshot(&self) -> BridgeStatus {
        BridgeStatus {
            connection_state: self.sync.state(),
            session: self.sync.session(),
            shadow: self
                .sync
                .shadow_entries()
                .iter()
                .map(|(id, entry)| (*id, entry.value))
                .collect(),
            ..self.status.clone()
        }
    }
}
