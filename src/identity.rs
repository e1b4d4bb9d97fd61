//! Stable device identity
//!
//! Home Assistant keys every discovered entity by this value, so it must not
//! change between restarts. A configured or previously persisted value wins;
//! otherwise the identity is derived from the first hardware address of the
//! machine and written back through an [`IdentityStore`].

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;

const NET_CLASS_DIR: &str = "/sys/class/net";

/// Storage for the persisted identity
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Option<String>;

    fn persist(&self, identity: &str) -> Result<(), BridgeError>;
}

/// Store kept in memory, clones share the same value
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    value: Arc<Mutex<Option<String>>>,
}

impl MemoryIdentityStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<String> {
        self.value.lock().clone()
    }

    fn persist(&self, identity: &str) -> Result<(), BridgeError> {
        *self.value.lock() = Some(identity.to_string());
        Ok(())
    }
}

type Fingerprint = Box<dyn Fn() -> String + Send + Sync>;

/// Lazily computed identity, cached for the lifetime of the value
pub struct DeviceIdentity {
    store: Box<dyn IdentityStore>,
    fingerprint: Fingerprint,
    cached: OnceLock<String>,
}

impl DeviceIdentity {
    pub fn new(store: Box<dyn IdentityStore>) -> Self {
        Self::with_fingerprint(store, hardware_fingerprint)
    }

    pub fn with_fingerprint<F>(store: Box<dyn IdentityStore>, fingerprint: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            store,
            fingerprint: Box::new(fingerprint),
            cached: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &str {
        self.cached.get_or_init(|| self.resolve())
    }

    /// Resolves the identity on the blocking pool
    ///
    /// The first resolution may write the store. Call this before handing the
    /// identity to async code that should not touch the filesystem.
    pub async fn prefetch(self: Arc<Self>) -> Result<String, BridgeError> {
        let identity = tokio::task::spawn_blocking(move || self.identity().to_string()).await?;
        Ok(identity)
    }

    fn resolve(&self) -> String {
        if let Some(stored) = self.store.load().filter(|id| !id.trim().is_empty()) {
            debug!("Using stored device identity {}", stored);
            return stored;
        }

        let computed = (self.fingerprint)();
        info!("Derived device identity {} from hardware", computed);
        if let Err(e) = self.store.persist(&computed) {
            error!("Device identity will change on restart: {}", e);
        }
        computed
    }
}

/// Decimal rendering of the first usable hardware address
///
/// Falls back to a random 48-bit value with the multicast bit set, which can
/// never collide with a real interface address.
pub fn hardware_fingerprint() -> String {
    match first_hardware_address(Path::new(NET_CLASS_DIR)) {
        Some(node) => node.to_string(),
        None => {
            warn!("No hardware address found, using a random node id");
            random_node().to_string()
        }
    }
}

fn first_hardware_address(net_dir: &Path) -> Option<u64> {
    let mut interfaces: Vec<_> = fs::read_dir(net_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "lo")
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces.iter().find_map(|iface| {
        let raw = fs::read_to_string(iface.join("address")).ok()?;
        parse_mac(raw.trim()).filter(|node| *node != 0)
    })
}

fn parse_mac(raw: &str) -> Option<u64> {
    let octets: Vec<&str> = raw.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    octets.iter().try_fold(0u64, |node, octet| {
        u8::from_str_radix(octet, 16)
            .ok()
            .map(|byte| (node << 8) | u64::from(byte))
    })
}

fn random_node() -> u64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let node = bytes[..6]
        .iter()
        .fold(0u64, |node, byte| (node << 8) | u64::from(*byte));
    node | (1 << 40)
}
