//! LAN service discovery via UDP announce/browse datagrams.
//!
//! Every node periodically sends an `Announce` datagram carrying its
//! [`ServiceRecord`] to the discovery port (by default the LAN broadcast
//! address).  Every node also listens on that port and keeps a
//! [`BrowseTable`] of the records it has heard:
//!
//! - a record heard for the first time produces [`DiscoveryEvent::Added`];
//! - a known record re-announced with different contents produces
//!   [`DiscoveryEvent::Updated`];
//! - a `Goodbye` datagram, or a record that has not been refreshed within the
//!   configured TTL, produces [`DiscoveryEvent::Removed`].
//!
//! Events are delivered on a `tokio::sync::mpsc` channel.  The runtime forwards
//! them into the single peer-update task (see `application::track_peers`),
//! which is the only writer of the peer table.
//!
//! # Threads and shutdown
//!
//! Both the announcer and the browser run on dedicated named threads using
//! blocking sockets.  The browse socket has a 500 ms read timeout; on each
//! timeout the thread checks the shared `running` flag and expires stale
//! records.  [`DiscoveryProvider::shutdown`] sends a goodbye for the registered
//! record, then clears the flag so both threads exit within one timeout.
//!
//! # Port sharing
//!
//! The browse socket binds the discovery port exclusively.  A second node on
//! the same host therefore fails to browse with [`DiscoveryError::BindFailed`];
//! the runtime logs this and keeps the listener running.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use anonbox_core::{Identity, PeerId, PeerRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::track_peers::PeerUpdate;

/// Default UDP port for discovery datagrams.
pub const DEFAULT_DISCOVERY_PORT: u16 = 54545;

/// Default service type advertised by AnonBox nodes.
pub const DEFAULT_SERVICE_TYPE: &str = "_anonbox._tcp.local.";

/// Prefix of every instance name.
pub const INSTANCE_PREFIX: &str = "AnonPeer-";

/// Property key carrying the advertiser's identity string.
pub const PROP_ID: &str = "id";

/// Property key carrying the advertiser's display name.
pub const PROP_USER: &str = "user";

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const ANNOUNCE_POLL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket configuration, send, or thread spawn failed.
    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A packet could not be serialised.
    #[error("failed to encode discovery packet: {0}")]
    Encode(#[from] serde_json::Error),

    /// `browse` was called a second time on the same provider.
    #[error("provider is already browsing")]
    AlreadyBrowsing,
}

/// A service record as advertised on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_type: String,
    /// Unique instance name; becomes the peer's discovery name.
    pub instance_name: String,
    pub address: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Builds the local node's record:
    /// `AnonPeer-<first 8 chars of id>.<service_type>` with `id` and `user`
    /// properties.
    pub fn for_identity(
        identity: &Identity,
        service_type: &str,
        address: IpAddr,
        port: u16,
    ) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_ID.to_string(), identity.id().to_string());
        properties.insert(PROP_USER.to_string(), identity.display_name().to_string());
        Self {
            service_type: service_type.to_string(),
            instance_name: format!("{INSTANCE_PREFIX}{}.{service_type}", identity.id().short(8)),
            address,
            port,
            properties,
        }
    }

    /// Resolves the advertised properties into a [`PeerRecord`].
    ///
    /// A missing `user` becomes `"Unknown"`; a missing `id` becomes the empty
    /// string.
    pub fn to_peer_record(&self) -> PeerRecord {
        PeerRecord {
            discovery_name: self.instance_name.clone(),
            address: self.address,
            port: self.port,
            peer_id: PeerId::from_string(self.properties.get(PROP_ID).cloned().unwrap_or_default()),
            username: self
                .properties
                .get(PROP_USER)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// A change observed while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(ServiceRecord),
    Updated(ServiceRecord),
    Removed { instance_name: String },
}

impl From<DiscoveryEvent> for PeerUpdate {
    fn from(event: DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::Added(record) | DiscoveryEvent::Updated(record) => {
                PeerUpdate::Upsert(record.to_peer_record())
            }
            DiscoveryEvent::Removed { instance_name } => PeerUpdate::Remove {
                discovery_name: instance_name,
            },
        }
    }
}

/// Advertises a local record and browses for others.
///
/// Implementations deliver events from their own execution context; callers
/// must not assume events arrive on the Tokio runtime.
pub trait DiscoveryProvider: Send + Sync {
    /// Starts advertising `record` until [`shutdown`](Self::shutdown).
    fn register(&self, record: ServiceRecord) -> Result<(), DiscoveryError>;

    /// Starts browsing for `service_type`, returning the event stream.
    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError>;

    /// Withdraws the advertisement and stops browsing.  Idempotent.
    fn shutdown(&self);
}

/// Datagram exchanged on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryPacket {
    Announce {
        record: ServiceRecord,
    },
    Goodbye {
        service_type: String,
        instance_name: String,
    },
}

impl DiscoveryPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiscoveryError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Records heard for one service type, with their last refresh time.
#[derive(Debug)]
pub struct BrowseTable {
    service_type: String,
    ttl: Duration,
    entries: HashMap<String, (ServiceRecord, Instant)>,
}

impl BrowseTable {
    pub fn new(service_type: impl Into<String>, ttl: Duration) -> Self {
        Self {
            service_type: service_type.into(),
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Feeds one packet received at `now` into the table.
    ///
    /// Packets for other service types are ignored.  Re-announcing an
    /// identical record only refreshes its timestamp.
    pub fn observe(&mut self, packet: DiscoveryPacket, now: Instant) -> Option<DiscoveryEvent> {
        match packet {
            DiscoveryPacket::Announce { record } => {
                if record.service_type != self.service_type {
                    return None;
                }
                let name = record.instance_name.clone();
                match self.entries.get_mut(&name) {
                    Some((known, seen)) => {
                        *seen = now;
                        if *known == record {
                            None
                        } else {
                            *known = record.clone();
                            Some(DiscoveryEvent::Updated(record))
                        }
                    }
                    None => {
                        self.entries.insert(name, (record.clone(), now));
                        Some(DiscoveryEvent::Added(record))
                    }
                }
            }
            DiscoveryPacket::Goodbye {
                service_type,
                instance_name,
            } => {
                if service_type != self.service_type {
                    return None;
                }
                self.entries
                    .remove(&instance_name)
                    .map(|_| DiscoveryEvent::Removed { instance_name })
            }
        }
    }

    /// Drops every record not refreshed within the TTL as of `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let ttl = self.ttl;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, (_, seen))| now.saturating_duration_since(*seen) > ttl)
            .map(|(name, _)| name.clone())
            .collect();

        stale
            .into_iter()
            .map(|instance_name| {
                self.entries.remove(&instance_name);
                DiscoveryEvent::Removed { instance_name }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Settings for [`LanDiscovery`].
#[derive(Debug, Clone)]
pub struct LanDiscoveryConfig {
    /// UDP port browsed on.
    pub port: u16,
    /// Where announcements and goodbyes are sent.
    pub announce_target: SocketAddr,
    pub announce_interval: Duration,
    pub record_ttl: Duration,
}

impl LanDiscoveryConfig {
    /// Broadcasts to `255.255.255.255:port` every 2 s with a 10 s TTL.
    pub fn broadcast(port: u16) -> Self {
        Self {
            port,
            announce_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
            announce_interval: Duration::from_secs(2),
            record_ttl: Duration::from_secs(10),
        }
    }
}

impl Default for LanDiscoveryConfig {
    fn default() -> Self {
        Self::broadcast(DEFAULT_DISCOVERY_PORT)
    }
}

/// [`DiscoveryProvider`] backed by UDP datagrams on the local network.
pub struct LanDiscovery {
    config: LanDiscoveryConfig,
    running: Arc<AtomicBool>,
    browsing: AtomicBool,
    registered: Mutex<Option<ServiceRecord>>,
}

impl LanDiscovery {
    pub fn new(config: LanDiscoveryConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
            browsing: AtomicBool::new(false),
            registered: Mutex::new(None),
        }
    }

    fn open_sender(&self) -> Result<UdpSocket, DiscoveryError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(socket)
    }

    fn send_goodbye(&self, record: &ServiceRecord) -> Result<(), DiscoveryError> {
        let packet = DiscoveryPacket::Goodbye {
            service_type: record.service_type.clone(),
            instance_name: record.instance_name.clone(),
        };
        let socket = self.open_sender()?;
        socket.send_to(&packet.to_bytes()?, self.config.announce_target)?;
        Ok(())
    }
}

impl DiscoveryProvider for LanDiscovery {
    fn register(&self, record: ServiceRecord) -> Result<(), DiscoveryError> {
        let socket = self.open_sender()?;
        let payload = DiscoveryPacket::Announce {
            record: record.clone(),
        }
        .to_bytes()?;
        let target = self.config.announce_target;
        let interval = self.config.announce_interval;
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("anonbox-announce".to_string())
            .spawn(move || announce_loop(socket, payload, target, interval, running))?;

        info!("advertising {} on {target}", record.instance_name);
        if let Ok(mut slot) = self.registered.lock() {
            *slot = Some(record);
        }
        Ok(())
    }

    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        if self.browsing.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyBrowsing);
        }

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.port);
        let socket = UdpSocket::bind(addr).map_err(|source| {
            self.browsing.store(false, Ordering::SeqCst);
            DiscoveryError::BindFailed { addr, source }
        })?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let table = BrowseTable::new(service_type, self.config.record_ttl);
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("anonbox-browse".to_string())
            .spawn(move || browse_loop(socket, table, tx, running))?;

        info!("browsing for {service_type} on UDP {addr}");
        Ok(rx)
    }

    fn shutdown(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let record = self.registered.lock().ok().and_then(|mut slot| slot.take());
        if let Some(record) = record {
            match self.send_goodbye(&record) {
                Ok(()) => debug!("sent goodbye for {}", record.instance_name),
                Err(e) => warn!("failed to send goodbye for {}: {e}", record.instance_name),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("discovery stopped");
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-sends the announcement every `interval` until `running` clears.
fn announce_loop(
    socket: UdpSocket,
    payload: Vec<u8>,
    target: SocketAddr,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        if let Err(e) = socket.send_to(&payload, target) {
            warn!("failed to send announcement to {target}: {e}");
        }

        let mut waited = Duration::ZERO;
        while waited < interval && running.load(Ordering::Relaxed) {
            std::thread::sleep(ANNOUNCE_POLL);
            waited += ANNOUNCE_POLL;
        }
    }
    debug!("announcer stopped");
}

/// Receives packets, maintains the browse table, and forwards events.
fn browse_loop(
    socket: UdpSocket,
    mut table: BrowseTable,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    'outer: while running.load(Ordering::Relaxed) {
        let mut events = Vec::new();

        match socket.recv_from(&mut buf) {
            Ok((len, src)) => match DiscoveryPacket::from_bytes(&buf[..len]) {
                Some(packet) => {
                    let packet = fill_source_address(packet, src.ip());
                    events.extend(table.observe(packet, Instant::now()));
                }
                None => debug!("ignoring undecodable discovery datagram from {src}"),
            },
            Err(e) if is_timeout_error(&e) => {}
            Err(e) => error!("discovery recv error: {e}"),
        }

        events.extend(table.expire(Instant::now()));

        for event in events {
            if tx.blocking_send(event).is_err() {
                // Receiver dropped; the node is shutting down.
                break 'outer;
            }
        }
    }

    info!("discovery browser stopped");
}

/// Replaces an unspecified advertised address with the datagram's source.
fn fill_source_address(packet: DiscoveryPacket, source: IpAddr) -> DiscoveryPacket {
    match packet {
        DiscoveryPacket::Announce { mut record } if record.address.is_unspecified() => {
            record.address = source;
            DiscoveryPacket::Announce { record }
        }
        other => other,
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
