//! Websocket client for the assistant's message bus
//!
//! One background task owns the socket. Outgoing messages are queued on an
//! unbounded channel and survive reconnects; incoming text frames are parsed
//! as [`Message`] envelopes and handed to the listener table.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BusListener, ListenerTable, Message, MessageBus};
use crate::error::BusError;

pub struct WebSocketBus {
    listeners: ListenerTable,
    outbound: mpsc::UnboundedSender<Message>,
}

enum Exit {
    Reconnect,
    Stop,
}

impl WebSocketBus {
    /// Spawns the connection task; must be called inside a tokio runtime
    pub fn connect(
        url: impl Into<String>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let listeners = ListenerTable::default();
        tokio::spawn(run_connection(
            url.into(),
            listeners.clone(),
            outbound_rx,
            reconnect_delay,
            cancel,
        ));
        Self {
            listeners,
            outbound,
        }
    }
}

impl MessageBus for WebSocketBus {
    fn emit(&self, message: Message) -> Result<(), BusError> {
        self.outbound.send(message).map_err(|_| BusError::Closed)
    }

    fn on(&self, msg_type: &str, listener: BusListener) -> Result<(), BusError> {
        self.listeners.add(msg_type, listener);
        Ok(())
    }
}

async fn run_connection(
    url: String,
    listeners: ListenerTable,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        match serve(&url, &listeners, &mut outbound, &cancel).await {
            Ok(Exit::Stop) => break,
            Ok(Exit::Reconnect) => info!("Message bus connection closed"),
            Err(e) => warn!("Message bus connection to {} failed: {}", url, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    info!("Message bus client stopped");
}

async fn serve(
    url: &str,
    listeners: &ListenerTable,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> Result<Exit, tungstenite::Error> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    info!("Connected to message bus at {}", url);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = write.send(Frame::Close(None)).await {
                    debug!("Failed to close message bus socket: {}", e);
                }
                return Ok(Exit::Stop);
            }
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    return Ok(Exit::Stop);
                };
                match serde_json::to_string(&message) {
                    Ok(text) => write.send(Frame::text(text)).await?,
                    Err(e) => error!("Failed to encode {}: {}", message.msg_type, e),
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Frame::Text(text))) => deliver(listeners, text.as_str()),
                Some(Ok(Frame::Close(_))) | None => return Ok(Exit::Reconnect),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            }
        }
    }
}

fn deliver(listeners: &ListenerTable, text: &str) {
    match serde_json::from_str::<Message>(text) {
        Ok(message) => {
            listeners.dispatch(&message);
        }
        Err(e) => debug!("Ignoring malformed bus frame: {}", e),
    }
}
