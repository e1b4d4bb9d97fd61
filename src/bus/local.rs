use tracing::debug;

use super::{BusListener, ListenerTable, Message, MessageBus};
use crate::error::BusError;

/// In-process bus delivering messages synchronously to its listeners
#[derive(Default, Clone)]
pub struct LocalBus {
    listeners: ListenerTable,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for LocalBus {
    fn emit(&self, message: Message) -> Result<(), BusError> {
        let delivered = self.listeners.dispatch(&message);
        debug!("Emitted {} ({} listener(s))", message.msg_type, delivered);
        Ok(())
    }

    fn on(&self, msg_type: &str, listener: BusListener) -> Result<(), BusError> {
        self.listeners.add(msg_type, listener);
        Ok(())
    }
}
