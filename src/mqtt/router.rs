//! Routing of incoming MQTT messages to command handlers
//!
//! Handlers decode a payload into the bus messages it stands for. The router
//! owns error isolation: a failing handler is logged and the router carries on
//! with the next message.

use std::collections::HashMap;

use tracing::{debug, error, trace, warn};

use crate::bus::{Message, MessageBus};
use crate::error::{BridgeError, CommandError};
use crate::features::FeatureId;

pub type CommandHandler = Box<dyn Fn(&str) -> Result<Vec<Message>, CommandError> + Send + Sync>;

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No handler is registered for the topic
    Ignored,
    /// The handler accepted the payload; holds the number of bus messages emitted
    Handled(usize),
    /// The payload was rejected, nothing was emitted
    Rejected,
}

struct Route {
    feature: FeatureId,
    handler: CommandHandler,
}

#[derive(Default)]
pub struct CommandRouter {
    routes: HashMap<String, Route>,
    order: Vec<String>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(
        &mut self,
        topic: String,
        feature: FeatureId,
        handler: CommandHandler,
    ) -> Result<(), BridgeError> {
        if self.routes.contains_key(&topic) {
            return Err(BridgeError::DuplicateTopic(topic));
        }
        debug!("Routing {} to {}", topic, feature);
        self.order.push(topic.clone());
        self.routes.insert(topic, Route { feature, handler });
        Ok(())
    }

    /// Registered command topics in registration order
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn dispatch(&self, topic: &str, raw: &[u8], bus: &dyn MessageBus) -> Dispatch {
        let Some(route) = self.routes.get(topic) else {
            trace!("No handler for {}", topic);
            return Dispatch::Ignored;
        };

        let messages = match std::str::from_utf8(raw)
            .map_err(CommandError::from)
            .and_then(|payload| (route.handler)(payload))
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Rejected command for {} on {}: {}", route.feature, topic, e);
                return Dispatch::Rejected;
            }
        };

        let mut emitted = 0;
        for message in messages {
            let msg_type = message.msg_type.clone();
            match bus.emit(message) {
                Ok(()) => emitted += 1,
                Err(e) => error!("Failed to emit {} for {}: {}", msg_type, route.feature, e),
            }
        }
        debug!("Command on {} emitted {} bus message(s)", topic, emitted);
        Dispatch::Handled(emitted)
    }
}
