//! Outbound path: one connection per message.
//!
//! [`Sender::send`] builds an envelope, seals it, frames it, connects, writes
//! the whole frame and closes.  There is no retry and no queue; a failed
//! attempt is logged and reported as `false`.
//!
//! [`Sender::broadcast`] sends the same chat line to every known peer in turn.
//! Each send is independent: one unreachable peer does not stop the others,
//! and no aggregate result is returned.
//!
//! A sealed payload larger than the configured frame limit is refused before
//! any connection is opened, so a sender never emits a frame its own listener
//! would reject.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anonbox_core::{
    encode_frame, Envelope, Identity, MessageType, PeerRecord, ProtocolError, SecurityContext,
    SecurityError,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::application::track_peers::PeerDirectory;

/// Errors from a single outbound attempt.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write frame to {addr}: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] ProtocolError),

    #[error("failed to seal envelope: {0}")]
    Encrypt(#[from] SecurityError),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Builds and delivers envelopes on behalf of the local identity.
///
/// Cheap to clone; all state is shared.
#[derive(Clone, Debug)]
pub struct Sender {
    identity: Arc<Identity>,
    security: Arc<SecurityContext>,
    directory: PeerDirectory,
    max_frame_bytes: usize,
}

impl Sender {
    pub fn new(
        identity: Arc<Identity>,
        security: Arc<SecurityContext>,
        directory: PeerDirectory,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            identity,
            security,
            directory,
            max_frame_bytes,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Serialises, encrypts and frames `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] (as [`SendError::Encode`]) when
    /// the sealed payload exceeds the frame limit.
    pub fn seal(&self, envelope: &Envelope) -> Result<Vec<u8>, SendError> {
        let plaintext = envelope.to_bytes()?;
        let sealed = self.security.encrypt(&plaintext)?;
        if sealed.len() > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                len: sealed.len(),
                max: self.max_frame_bytes,
            }
            .into());
        }
        Ok(encode_frame(&sealed)?)
    }

    /// Delivers `envelope` to `addr` in a single connection.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing is retried.
    pub async fn try_send(&self, addr: SocketAddr, envelope: &Envelope) -> Result<(), SendError> {
        let frame = self.seal(envelope)?;

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SendError::Connect { addr, source })?;
        stream
            .write_all(&frame)
            .await
            .map_err(|source| SendError::Write { addr, source })?;
        stream
            .shutdown()
            .await
            .map_err(|source| SendError::Write { addr, source })?;

        debug!("sent {} bytes to {addr}", frame.len());
        Ok(())
    }

    /// Builds an envelope stamped with the local identity and sends it.
    ///
    /// Returns `true` on success.  Failures are logged, never propagated.
    pub async fn send(
        &self,
        address: IpAddr,
        port: u16,
        kind: MessageType,
        content: Option<String>,
        filename: Option<String>,
    ) -> bool {
        let envelope = Envelope::new(&self.identity, kind, content, filename);
        let addr = SocketAddr::new(address, port);
        match self.try_send(addr, &envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!("send to {addr} failed: {e}");
                false
            }
        }
    }

    /// [`Sender::send`] addressed by a registry record.
    pub async fn send_to_peer(
        &self,
        peer: &PeerRecord,
        kind: MessageType,
        content: Option<String>,
        filename: Option<String>,
    ) -> bool {
        self.send(peer.address, peer.port, kind, content, filename)
            .await
    }

    /// Sends a chat line to every peer currently in the directory.
    pub async fn broadcast(&self, content: &str) {
        let peers = self.directory.snapshot().await;
        if peers.is_empty() {
            info!("no peers to broadcast to");
            return;
        }

        for peer in &peers {
            let ok = self
                .send_to_peer(peer, MessageType::Chat, Some(content.to_string()), None)
                .await;
            if ok {
                debug!("broadcast delivered to {}", peer.username);
            } else {
                warn!(
                    "broadcast to {} ({}) failed",
                    peer.username, peer.discovery_name
                );
            }
        }
    }

    /// Reads `path`, base64-encodes it and sends it as a `file` envelope named
    /// after the file's base name.
    pub async fn share_file(&self, peer: &PeerRecord, path: &Path) -> bool {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(source) => {
                let e = SendError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                };
                warn!("{e}");
                return false;
            }
        };

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        // Base64 only grows the body, so a file already over the limit can never fit.
        if bytes.len() > self.max_frame_bytes {
            warn!(
                "{filename} is {} bytes, over the {} byte frame limit",
                bytes.len(),
                self.max_frame_bytes
            );
            return false;
        }
        info!(
            "sending {filename} ({} bytes) to {}",
            bytes.len(),
            peer.username
        );

        self.send_to_peer(
            peer,
            MessageType::File,
            Some(STANDARD.encode(bytes)),
            Some(filename),
        )
        .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
