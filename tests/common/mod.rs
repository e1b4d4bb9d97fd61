#![allow(dead_code)]

use std::sync::Arc;

use mqtt_adapter::bridge::{Bridge, BridgeHandle, BridgeOptions, BridgeSettings};
use mqtt_adapter::bus::{LocalBus, Message, MessageBus};
use mqtt_adapter::config::DeviceConfig;
use mqtt_adapter::error::TransportError;
use mqtt_adapter::features::FeatureId;
use mqtt_adapter::identity::{DeviceIdentity, MemoryIdentityStore};
use mqtt_adapter::mqtt::config::{LastWill, SessionSettings};
use mqtt_adapter::mqtt::message::{MqttEvent, MqttEventSink};
use mqtt_adapter::mqtt::topics::TopicNamespace;
use mqtt_adapter::mqtt::transport::{Connector, MqttTransport};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Everything the bridge asked the broker to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Connect { session: u64, host: String },
    Publish { topic: String, payload: String, retain: bool },
    Subscribe(String),
    Disconnect { session: u64 },
    /// The bridge waited for closed sessions to flush
    Drain,
}

pub fn retained(topic: &str, payload: &str) -> Op {
    Op::Publish {
        topic: topic.to_string(),
        payload: payload.to_string(),
        retain: true,
    }
}

/// Recording stand-in for the broker side
#[derive(Clone, Default)]
pub struct FakeBroker {
    ops: Arc<Mutex<Vec<Op>>>,
    sinks: Arc<Mutex<Vec<MqttEventSink>>>,
    wills: Arc<Mutex<Vec<LastWill>>>,
}

impl FakeBroker {
    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    pub fn wills(&self) -> Vec<LastWill> {
        self.wills.lock().clone()
    }

    /// Sink handed out for the n-th session, counting from zero
    pub fn sink(&self, index: usize) -> MqttEventSink {
        self.sinks.lock()[index].clone()
    }

    /// Lets the freshly spawned bridge task run `connect()` before looking
    async fn latest(&self) -> MqttEventSink {
        for _ in 0..100 {
            if let Some(sink) = self.sinks.lock().last().cloned() {
                return sink;
            }
            tokio::task::yield_now().await;
        }
        panic!("no session was opened")
    }

    pub async fn ack(&self) {
        assert!(self.latest().await.send(MqttEvent::Connected).await);
    }

    pub async fn drop_connection(&self) {
        let lost = MqttEvent::ConnectionLost {
            reason: "broker went away".to_string(),
        };
        assert!(self.latest().await.send(lost).await);
    }

    pub async fn deliver(&self, topic: &str, payload: &[u8]) {
        let message = MqttEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        assert!(self.latest().await.send(message).await);
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

impl Connector for FakeConnector {
    fn connect(
        &mut self,
        settings: &SessionSettings,
        will: &LastWill,
        sink: MqttEventSink,
    ) -> Result<Box<dyn MqttTransport>, TransportError> {
        let session = sink.session();
        self.broker.ops.lock().push(Op::Connect {
            session,
            host: settings.host.clone(),
        });
        self.broker.wills.lock().push(will.clone());
        self.broker.sinks.lock().push(sink);
        Ok(Box::new(FakeTransport {
            broker: self.broker.clone(),
            session,
        }))
    }

    fn drain(&mut self) -> BoxFuture<'static, ()> {
        let ops = self.broker.ops.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            ops.lock().push(Op::Drain);
        })
    }
}

struct FakeTransport {
    broker: FakeBroker,
    session: u64,
}

impl MqttTransport for FakeTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        self.broker.ops.lock().push(Op::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.broker.ops.lock().push(Op::Subscribe(topic.to_string()));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.broker.ops.lock().push(Op::Disconnect {
            session: self.session,
        });
        Ok(())
    }
}

/// Records every bus message of the given types
pub fn record(bus: &LocalBus, msg_types: &[&str]) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for msg_type in msg_types {
        let sink = seen.clone();
        bus.on(
            msg_type,
            Arc::new(move |message: &Message| sink.lock().push(message.clone())),
        )
        .expect("local bus accepts listeners");
    }
    seen
}

pub fn msg_types(seen: &Mutex<Vec<Message>>) -> Vec<String> {
    seen.lock().iter().map(|m| m.msg_type.clone()).collect()
}

pub fn options(features: &[FeatureId]) -> BridgeOptions {
    BridgeOptions {
        namespace: TopicNamespace::default(),
        features: features.to_vec(),
        device: DeviceConfig::default(),
        lang: "en-us".to_string(),
        settings: BridgeSettings::default(),
    }
}

pub struct Harness {
    pub handle: BridgeHandle,
    pub task: JoinHandle<()>,
    pub broker: FakeBroker,
    pub bus: LocalBus,
}

impl Harness {
    /// Waits until every event queued so far has been handled
    pub async fn settle(&self) {
        self.handle.status().await.expect("bridge is running");
    }
}

/// Spawns a bridge; listeners on `bus` registered before this call see startup traffic
pub fn start_with(options: BridgeOptions, bus: LocalBus) -> Harness {
    let broker = FakeBroker::default();
    let identity = DeviceIdentity::with_fingerprint(Box::new(MemoryIdentityStore::default()), || {
        "42".to_string()
    });
    let bridge = Bridge::new(
        options,
        Arc::new(identity),
        Arc::new(bus.clone()),
        broker.connector(),
    )
    .expect("bridge builds");
    let (handle, task) = bridge.spawn();
    Harness {
        handle,
        task,
        broker,
        bus,
    }
}

pub fn start(features: &[FeatureId]) -> Harness {
    start_with(options(features), LocalBus::new())
}
