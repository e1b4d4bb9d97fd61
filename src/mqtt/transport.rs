//! MQTT transport collaborator
//!
//! The bridge talks to the broker through two small traits so the lifecycle
//! logic can run against a recording fake in tests. [`RumqttConnector`] is
//! the production implementation on top of rumqttc: every session gets its own
//! `AsyncClient` plus a polling task that forwards broker events into the
//! bridge queue and keeps reconnecting until the session is closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{LastWill, SessionSettings};
use super::message::{MqttEvent, MqttEventSink};
use crate::error::TransportError;

const REQUEST_CAPACITY: usize = 100;

/// Time a closed session gets to flush its queued requests
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Fire-and-forget operations on an established session
pub trait MqttTransport: Send {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Requests a clean disconnect after every queued request went out
    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Opens transport sessions
pub trait Connector: Send {
    /// Starts a session; progress is reported through `sink`
    fn connect(
        &mut self,
        settings: &SessionSettings,
        will: &LastWill,
        sink: MqttEventSink,
    ) -> Result<Box<dyn MqttTransport>, TransportError>;

    /// Resolves once closed sessions delivered their last requests
    fn drain(&mut self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    poller: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub struct RumqttConnector {
    current: Option<Session>,
    retired: Vec<Session>,
}

impl RumqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the current session aside, returning its token if it is still flushing
    fn retire_current(&mut self) -> Option<CancellationToken> {
        self.retired.retain(|session| !session.poller.is_finished());
        let session = self.current.take()?;

        let flushing = if session.closing.load(Ordering::SeqCst) {
            debug!("Session {} is closing, letting it flush", session.id);
            Some(session.cancel.clone())
        } else {
            // A session that was never closed must not keep reconnecting
            session.cancel.cancel();
            None
        };
        self.retired.push(session);
        flushing
    }
}

impl Connector for RumqttConnector {
    fn connect(
        &mut self,
        settings: &SessionSettings,
        will: &LastWill,
        sink: MqttEventSink,
    ) -> Result<Box<dyn MqttTransport>, TransportError> {
        settings.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        if let Some(flushing) = self.retire_current() {
            runtime.spawn(async move {
                tokio::time::sleep(CLOSE_TIMEOUT).await;
                flushing.cancel();
            });
        }

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        if let Some(username) = &settings.username {
            options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
        }
        options.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.clone(),
            QoS::AtLeastOnce,
            will.retain,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let cancel = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));

        info!(
            "Connecting to MQTT broker {}:{} as {} (session {})",
            settings.host,
            settings.port,
            settings.client_id,
            sink.session()
        );
        let id = sink.session();
        let poller = runtime.spawn(poll_events(
            eventloop,
            sink,
            cancel.clone(),
            closing.clone(),
            settings.reconnect_delay,
        ));
        self.current = Some(Session {
            id,
            cancel: cancel.clone(),
            closing: closing.clone(),
            poller,
        });

        Ok(Box::new(RumqttTransport {
            client,
            cancel,
            closing,
        }))
    }

    fn drain(&mut self) -> BoxFuture<'static, ()> {
        self.retire_current();
        let sessions = std::mem::take(&mut self.retired);
        Box::pin(async move {
            for session in sessions {
                let Session {
                    id, cancel, poller, ..
                } = session;
                match tokio::time::timeout(CLOSE_TIMEOUT, poller).await {
                    Ok(_) => debug!("Session {} drained", id),
                    Err(_) => {
                        warn!("Session {} did not close in time", id);
                        cancel.cancel();
                    }
                }
            }
        })
    }
}

struct RumqttTransport {
    client: AsyncClient,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
}

impl MqttTransport for RumqttTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            // Nothing will drain the request queue, stop polling right away
            self.cancel.cancel();
            return Err(e.into());
        }
        Ok(())
    }
}

async fn poll_events(
    mut eventloop: EventLoop,
    sink: MqttEventSink,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    let session = sink.session();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        let forwarded = match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck received: {:?}", ack.code);
                sink.send(MqttEvent::Connected).await
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                sink.send(MqttEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                })
                .await
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker (session {})", session);
                break;
            }
            Ok(_) => true,
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("Session {} closed: {}", session, e);
                    break;
                }
                warn!("MQTT connection error (session {}): {}", session, e);
                if !sink
                    .send(MqttEvent::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await
                {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
                true
            }
        };

        if !forwarded {
            error!("Bridge stopped, ending MQTT session {}", session);
            break;
        }
    }
    debug!("Polling task of session {} finished", session);
}
