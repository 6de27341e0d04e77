//! Inbound path: TCP accept loop and the per-connection state machine.
//!
//! Each connection carries exactly one frame and moves through:
//!
//! ```text
//! Accepted ─► ReadingLength ─► ReadingBody ─► Decrypting ─► Dispatching ─► Closed
//!                  │                │              │
//!                  └── short read ──┴── failure ───┴──────────────────────► Closed
//! ```
//!
//! A peer that closes early, sends an oversized length, fails authentication
//! or sends an unparseable payload is logged and dropped.  Nothing that happens
//! on one connection can reach the accept loop or another connection.
//!
//! # Concurrency
//!
//! The accept loop runs on one Tokio task and spawns a task per connection.
//! A semaphore caps the number of connections handled at once; when the cap
//! is reached the loop waits for a permit before accepting more sockets.
//! There are no read timeouts: a stalled peer holds its permit until the OS
//! gives up on the socket.
//!
//! # Shutdown
//!
//! The loop exits when the `running` flag is cleared and a shutdown signal is
//! received on the broadcast channel.  Dropping the loop closes the listening
//! socket; in-flight connection tasks run to completion.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anonbox_core::{
    parse_length_prefix, Envelope, ProtocolError, SecurityContext, SecurityError,
    DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_SIZE,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::receive_message::MessageDispatcher;

/// Default cap on concurrently handled connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Why a connection was dropped without dispatching.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The socket failed for a reason other than an orderly early close.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The payload did not decrypt under the configured key.
    #[error(transparent)]
    Authentication(#[from] SecurityError),

    /// The length prefix was out of range or the payload did not parse.
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),
}

/// Stages of the per-connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    ReadingLength,
    ReadingBody,
    Decrypting,
    Dispatching,
    Closed,
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// One envelope was delivered to the dispatcher.
    Dispatched,
    /// The peer closed the stream during the given stage.
    ClosedEarly(ConnectionState),
    /// The frame was rejected.
    Rejected(ReceiveError),
}

/// Runs one connection through the state machine.
///
/// Reads a single frame from `stream`, opens it with `security`, parses the
/// envelope and hands it to `dispatcher`.  Never returns an error: every
/// failure is reported through the returned [`ConnectionOutcome`].
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    security: &SecurityContext,
    dispatcher: &dyn MessageDispatcher,
    max_frame_bytes: usize,
) -> ConnectionOutcome
where
    S: AsyncRead + Unpin,
{
    debug!("{peer}: {:?}", ConnectionState::Accepted);

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    if let Err(e) = stream.read_exact(&mut prefix).await {
        return read_failure(ConnectionState::ReadingLength, e);
    }
    let len = match parse_length_prefix(&prefix, max_frame_bytes) {
        Ok(len) => len,
        Err(e) => return ConnectionOutcome::Rejected(e.into()),
    };

    let mut body = vec![0u8; len];
    if let Err(e) = stream.read_exact(&mut body).await {
        return read_failure(ConnectionState::ReadingBody, e);
    }

    debug!("{peer}: {:?} {len} bytes", ConnectionState::Decrypting);
    let plaintext = match security.decrypt(&body) {
        Ok(plaintext) => plaintext,
        Err(e) => return ConnectionOutcome::Rejected(e.into()),
    };
    let envelope = match Envelope::from_bytes(&plaintext) {
        Ok(envelope) => envelope,
        Err(e) => return ConnectionOutcome::Rejected(e.into()),
    };

    debug!(
        "{peer}: {:?} {} message",
        ConnectionState::Dispatching,
        envelope.kind.as_str()
    );
    dispatcher.dispatch(envelope);
    ConnectionOutcome::Dispatched
}

fn read_failure(state: ConnectionState, e: std::io::Error) -> ConnectionOutcome {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ConnectionOutcome::ClosedEarly(state)
    } else {
        ConnectionOutcome::Rejected(ReceiveError::Connection(e))
    }
}

fn log_outcome(peer: SocketAddr, outcome: &ConnectionOutcome) {
    match outcome {
        ConnectionOutcome::Dispatched => {
            debug!("{peer}: {:?}", ConnectionState::Closed)
        }
        ConnectionOutcome::ClosedEarly(state) => {
            debug!("{peer}: closed during {state:?}; nothing dispatched")
        }
        ConnectionOutcome::Rejected(ReceiveError::Authentication(e)) => {
            warn!("{peer}: decryption failed (wrong passphrase or tampered frame): {e}")
        }
        ConnectionOutcome::Rejected(e) => warn!("{peer}: dropped: {e}"),
    }
}

/// Settings for [`Listener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    pub max_frame_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// A bound TCP listener ready to run the accept loop.
pub struct Listener {
    listener: TcpListener,
    security: Arc<SecurityContext>,
    dispatcher: Arc<dyn MessageDispatcher>,
    limiter: Arc<Semaphore>,
    max_frame_bytes: usize,
}

impl Listener {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be bound.
    pub async fn bind(
        config: &ListenerConfig,
        security: Arc<SecurityContext>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self {
            listener,
            security,
            dispatcher,
            limiter: Arc::new(Semaphore::new(config.max_connections.max(1))),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns [`Listener::run`] on the current runtime.
    pub fn spawn(
        self,
        running: Arc<AtomicBool>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(running, shutdown))
    }

    /// Accepts connections until shut down.
    pub async fn run(self, running: Arc<AtomicBool>, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.local_addr() {
            info!("listening on TCP {addr}");
        }

        while running.load(Ordering::Relaxed) {
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let security = Arc::clone(&self.security);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let max_frame_bytes = self.max_frame_bytes;
                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = handle_connection(
                            stream,
                            peer,
                            &security,
                            dispatcher.as_ref(),
                            max_frame_bytes,
                        )
                        .await;
                        log_outcome(peer, &outcome);
                    });
                }
                Err(e) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    error!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        info!("listener stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::receive_message::{ChannelDispatcher, MockMessageDispatcher};
    use anonbox_core::{encode_frame, Identity, MessageType, PeerId};
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn make_identity() -> Identity {
        Identity::with_id(PeerId::from_string("sender-id"), Some("Alice".to_string()))
    }

    fn sealed_frame(security: &SecurityContext, text: &str) -> Vec<u8> {
        let envelope = Envelope::chat(&make_identity(), text);
        let sealed = security.encrypt(&envelope.to_bytes().unwrap()).unwrap();
        encode_frame(&sealed).unwrap()
    }

    fn never_dispatched() -> MockMessageDispatcher {
        let mut mock = MockMessageDispatcher::new();
        mock.expect_dispatch().times(0);
        mock
    }

    #[tokio::test]
    async fn test_plain_frame_is_dispatched() {
        // Arrange
        let security = SecurityContext::passthrough();
        let stream = Builder::new().read(&sealed_frame(&security, "hi")).build();
        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|e| {
                e.content.as_deref() == Some("hi")
                    && e.kind == MessageType::Chat
                    && e.sender_name == "Alice"
            })
            .times(1)
            .return_const(());

        // Act
        let outcome = handle_connection(
            stream,
            peer(),
            &security,
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        // Assert
        assert!(matches!(outcome, ConnectionOutcome::Dispatched));
    }

    #[tokio::test]
    async fn test_encrypted_frame_is_dispatched() {
        let security = SecurityContext::from_passphrase(Some("secret123"));
        let stream = Builder::new()
            .read(&sealed_frame(&security, "secret hello"))
            .build();
        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|e| e.content.as_deref() == Some("secret hello"))
            .times(1)
            .return_const(());

        let outcome = handle_connection(
            stream,
            peer(),
            &security,
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(outcome, ConnectionOutcome::Dispatched));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads_is_reassembled() {
        let security = SecurityContext::passthrough();
        let frame = sealed_frame(&security, "chunked");
        let (a, rest) = frame.split_at(2);
        let (b, c) = rest.split_at(10);
        let stream = Builder::new().read(a).read(b).read(c).build();
        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher.expect_dispatch().times(1).return_const(());

        let outcome = handle_connection(
            stream,
            peer(),
            &security,
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(outcome, ConnectionOutcome::Dispatched));
    }

    #[tokio::test]
    async fn test_empty_stream_closes_while_reading_length() {
        let stream = Builder::new().build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::ClosedEarly(ConnectionState::ReadingLength)
        ));
    }

    #[tokio::test]
    async fn test_partial_length_prefix_closes_early() {
        let stream = Builder::new().read(&[0, 0]).build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::ClosedEarly(ConnectionState::ReadingLength)
        ));
    }

    #[tokio::test]
    async fn test_short_body_never_dispatches() {
        // Arrange: declare 10 bytes, deliver 3, then close.
        let stream = Builder::new().read(&[0, 0, 0, 10]).read(b"abc").build();
        let dispatcher = never_dispatched();

        // Act
        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        // Assert
        assert!(matches!(
            outcome,
            ConnectionOutcome::ClosedEarly(ConnectionState::ReadingBody)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected_without_reading_body() {
        // Only the header is supplied.
        let stream = Builder::new().read(&[0, 0, 4, 0]).build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            512,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ReceiveError::Malformed(ProtocolError::FrameTooLarge {
                len: 1024,
                max: 512
            }))
        ));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_rejected_as_authentication() {
        let sender = SecurityContext::from_passphrase(Some("secret123"));
        let receiver = SecurityContext::from_passphrase(Some("wrong"));
        let stream = Builder::new().read(&sealed_frame(&sender, "hidden")).build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &receiver,
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ReceiveError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_frame_is_rejected() {
        let security = SecurityContext::from_passphrase(Some("secret123"));
        let mut frame = sealed_frame(&security, "hello");
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let stream = Builder::new().read(&frame).build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &security,
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ReceiveError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_rejected_as_malformed() {
        let frame = encode_frame(b"{not json").unwrap();
        let stream = Builder::new().read(&frame).build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ReceiveError::Malformed(
                ProtocolError::MalformedPayload(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_socket_error_is_rejected_as_connection_error() {
        let stream = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let dispatcher = never_dispatched();

        let outcome = handle_connection(
            stream,
            peer(),
            &SecurityContext::passthrough(),
            &dispatcher,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await;

        assert!(matches!(
            outcome,
            ConnectionOutcome::Rejected(ReceiveError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_loop_dispatches_and_stops_on_shutdown() {
        // Arrange
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        let config = ListenerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ListenerConfig::default()
        };
        let security = Arc::new(SecurityContext::passthrough());
        let listener = Listener::bind(&config, Arc::clone(&security), Arc::new(dispatcher))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = listener.spawn(Arc::clone(&running), shutdown_rx);

        // Act
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&sealed_frame(&security, "over tcp"))
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        running.store(false, Ordering::Relaxed);
        shutdown_tx.send(()).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;

        // Assert
        assert_eq!(received.content.as_deref(), Some("over tcp"));
        assert!(stopped.is_ok(), "accept loop must exit after shutdown");
    }
}
