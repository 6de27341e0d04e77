//! ChatNode: the start/stop sequence that turns the parts into a running peer.
//!
//! ```text
//! start()
//!  ├─ Identity::generate, SecurityContext::from_passphrase
//!  ├─ Listener::bind + spawn            (accept loop task)
//!  └─ discovery (optional)
//!       ├─ register(local ServiceRecord)
//!       └─ browse() ─► run_peer_updates  (single registry writer task)
//!
//! stop()
//!  running = false ─► discovery.shutdown() ─► shutdown signal
//!  ─► await accept loop ─► abort pump ─► clear peers and history
//! ```
//!
//! Discovery failures are logged and otherwise ignored: a node whose
//! discovery port is taken still receives messages on its listener.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anonbox_core::{current_timestamp, Identity, MessageType, PeerRecord, SecurityContext};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::history::{ChatHistory, Direction, HistoryEntry};
use crate::application::receive_message::MessageDispatcher;
use crate::application::track_peers::{run_peer_updates, PeerDirectory};
use crate::infrastructure::network::discovery::{
    DiscoveryProvider, ServiceRecord, DEFAULT_SERVICE_TYPE,
};
use crate::infrastructure::network::listener::{Listener, ListenerConfig};
use crate::infrastructure::network::local_addr::local_ip_address;
use crate::infrastructure::network::sender::Sender;
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

/// Errors surfaced by [`ChatNode`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// The TCP listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// No known peer matches the given token.
    #[error("no peer matches {0:?}")]
    PeerNotFound(String),

    /// The message could not be delivered to the named peer.
    #[error("could not deliver to {0}")]
    SendFailed(String),
}

/// Everything needed to start a node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub display_name: Option<String>,
    pub passphrase: Option<String>,
    pub listener: ListenerConfig,
    pub service_type: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            display_name: None,
            passphrase: None,
            listener: ListenerConfig::default(),
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
        }
    }
}

impl NodeOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            display_name: config.node.display_name.clone(),
            passphrase: config.node.passphrase.clone(),
            listener: ListenerConfig {
                bind_addr: config.network.listen_addr()?,
                max_connections: config.network.max_connections,
                max_frame_bytes: config.network.max_frame_bytes,
            },
            service_type: config.network.service_type.clone(),
        })
    }
}

/// A running peer: listener, optional discovery and the shared peer table.
pub struct ChatNode {
    identity: Arc<Identity>,
    security: Arc<SecurityContext>,
    directory: PeerDirectory,
    sender: Sender,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    listener_task: JoinHandle<()>,
    pump_task: Option<JoinHandle<()>>,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    history: Option<Arc<ChatHistory>>,
}

impl ChatNode {
    /// Starts a node with a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bind`] if the listener cannot be bound.  Discovery
    /// errors never fail startup.
    pub async fn start(
        options: NodeOptions,
        dispatcher: Arc<dyn MessageDispatcher>,
        discovery: Option<Arc<dyn DiscoveryProvider>>,
    ) -> Result<Self, NodeError> {
        let identity = Identity::generate(options.display_name.clone());
        Self::start_with_identity(identity, options, dispatcher, discovery).await
    }

    /// Starts a node with the given identity.
    pub async fn start_with_identity(
        identity: Identity,
        options: NodeOptions,
        dispatcher: Arc<dyn MessageDispatcher>,
        discovery: Option<Arc<dyn DiscoveryProvider>>,
    ) -> Result<Self, NodeError> {
        let identity = Arc::new(identity);
        let security = Arc::new(SecurityContext::from_passphrase(
            options.passphrase.as_deref(),
        ));
        info!(
            "starting as {} ({}), encryption {}",
            identity.display_name(),
            identity.id(),
            if security.is_encrypted() { "on" } else { "off" }
        );

        let listener = Listener::bind(&options.listener, Arc::clone(&security), dispatcher)
            .await
            .map_err(NodeError::Bind)?;
        let local_addr = listener.local_addr().map_err(NodeError::Bind)?;

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener_task = listener.spawn(Arc::clone(&running), shutdown_rx);

        let directory = PeerDirectory::new(identity.id().clone());
        let pump_task = discovery.as_deref().and_then(|provider| {
            start_discovery(
                provider,
                &identity,
                &options.service_type,
                local_addr,
                directory.clone(),
            )
        });

        let sender = Sender::new(
            Arc::clone(&identity),
            Arc::clone(&security),
            directory.clone(),
            options.listener.max_frame_bytes,
        );

        Ok(Self {
            identity,
            security,
            directory,
            sender,
            local_addr,
            running,
            shutdown_tx,
            listener_task,
            pump_task,
            discovery,
            history: None,
        })
    }

    /// Records outgoing chat lines in `history` and clears it on stop.
    pub fn with_history(mut self, history: Arc<ChatHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Known peers in discovery-name order.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.directory.snapshot().await
    }

    /// Sends `text` to the peer `token` resolves to.
    pub async fn chat(&self, token: &str, text: &str) -> Result<(), NodeError> {
        let peer = self.resolve(token).await?;
        if !self
            .sender
            .send_to_peer(&peer, MessageType::Chat, Some(text.to_string()), None)
            .await
        {
            return Err(NodeError::SendFailed(peer.discovery_name));
        }
        self.record_outgoing(&peer.username, text);
        Ok(())
    }

    /// Sends the file at `path` to the peer `token` resolves to.
    pub async fn share(&self, token: &str, path: &Path) -> Result<(), NodeError> {
        let peer = self.resolve(token).await?;
        if !self.sender.share_file(&peer, path).await {
            return Err(NodeError::SendFailed(peer.discovery_name));
        }
        self.record_outgoing(&peer.username, &format!("sent file: {}", path.display()));
        Ok(())
    }

    /// Sends `text` to every known peer.
    pub async fn broadcast(&self, text: &str) {
        self.sender.broadcast(text).await;
        self.record_outgoing("all", text);
    }

    /// Runs the stop sequence and waits for the accept loop to exit.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(provider) = &self.discovery {
            provider.shutdown();
        }

        // No receivers means the loop is already gone.
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.listener_task.await {
            warn!("listener task ended abnormally: {e}");
        }

        if let Some(pump) = self.pump_task {
            pump.abort();
        }

        self.directory.clear().await;
        if let Some(history) = &self.history {
            history.clear();
        }
        info!("node stopped");
    }

    async fn resolve(&self, token: &str) -> Result<PeerRecord, NodeError> {
        self.directory
            .find(token)
            .await
            .ok_or_else(|| NodeError::PeerNotFound(token.to_string()))
    }

    fn record_outgoing(&self, peer_name: &str, text: &str) {
        if let Some(history) = &self.history {
            history.record(HistoryEntry {
                direction: Direction::Outgoing,
                peer_name: peer_name.to_string(),
                text: text.to_string(),
                timestamp: current_timestamp(),
            });
        }
    }
}

/// Advertises the local record and starts the peer-update pump.
///
/// Returns `None` if browsing could not start.  Registration and browsing
/// failures are logged only.
fn start_discovery(
    provider: &dyn DiscoveryProvider,
    identity: &Identity,
    service_type: &str,
    local_addr: SocketAddr,
    directory: PeerDirectory,
) -> Option<JoinHandle<()>> {
    let address = if local_addr.ip().is_unspecified() {
        local_ip_address()
    } else {
        local_addr.ip()
    };
    let record = ServiceRecord::for_identity(identity, service_type, address, local_addr.port());

    if let Err(e) = provider.register(record) {
        error!("failed to advertise service: {e}");
    }

    match provider.browse(service_type) {
        Ok(rx) => Some(tokio::spawn(run_peer_updates(rx, directory))),
        Err(e) => {
            error!("failed to browse for peers: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
