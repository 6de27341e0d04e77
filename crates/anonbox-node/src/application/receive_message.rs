//! ReceiveMessage: what happens to an envelope after the listener decodes it.
//!
//! The listener knows nothing about chat windows or files on disk.  For every
//! successfully decoded envelope it calls [`MessageDispatcher::dispatch`]
//! inline, inside that connection's handler task.  A slow dispatcher therefore
//! only delays the closing of its own connection, never other connections,
//! but it must not block indefinitely.
//!
//! # Attachments
//!
//! A `file` envelope carries the base64-encoded file body in `content` and the
//! sender-supplied name in `filename`.  The name comes from an untrusted peer,
//! so [`sanitize_filename`] reduces it to a single harmless path component
//! before [`AttachmentStore`] writes `received_<name>` into the download
//! directory.  The envelope itself is left untouched.
//!
//! Inside a tokio runtime [`ChatDispatcher`] hands the decode and write to the
//! blocking pool, so a large attachment never stalls an async worker.  Outside
//! a runtime the save runs inline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anonbox_core::{Envelope, MessageType};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::application::history::{ChatHistory, Direction, HistoryEntry};

/// Prefix prepended to every saved attachment.
pub const RECEIVED_PREFIX: &str = "received_";

/// Name used when a peer sends an empty or fully stripped filename.
const FALLBACK_FILENAME: &str = "attachment";

/// Name used when a `file` envelope has no filename at all.
const UNKNOWN_FILENAME: &str = "unknown_file";

/// Consumer of decoded envelopes (the CLI/GUI boundary).
///
/// Implementations must be cheap or at least bounded: `dispatch` runs on the
/// connection's handler task.
#[cfg_attr(test, mockall::automock)]
pub trait MessageDispatcher: Send + Sync {
    fn dispatch(&self, envelope: Envelope);
}

/// Errors that can occur while saving a received attachment.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// The envelope content is not valid base64.
    #[error("attachment content is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Writing the file failed.
    #[error("failed to write attachment to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reduces an untrusted filename to a single safe path component.
///
/// Keeps only the last component after `/` or `\`, drops control characters
/// and `:`, and replaces empty, `.` and `..` results with `"attachment"`.
///
/// # Examples
///
/// ```rust
/// use anonbox_node::application::receive_message::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
/// assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
/// assert_eq!(sanitize_filename(".."), "attachment");
/// ```
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != ':')
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Writes received attachments into a download directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path an attachment named `filename` would be saved to.
    pub fn target_path(&self, filename: Option<&str>) -> PathBuf {
        let name = sanitize_filename(filename.unwrap_or(UNKNOWN_FILENAME));
        self.dir.join(format!("{RECEIVED_PREFIX}{name}"))
    }

    /// Decodes `content` from base64 and writes it to
    /// `<dir>/received_<sanitised filename>`, overwriting any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::Decode`] for invalid base64 and
    /// [`AttachmentError::Io`] if the file cannot be written.
    pub fn save(
        &self,
        filename: Option<&str>,
        content: Option<&str>,
    ) -> Result<PathBuf, AttachmentError> {
        let bytes = STANDARD.decode(content.unwrap_or_default())?;
        let path = self.target_path(filename);
        std::fs::write(&path, bytes).map_err(|source| AttachmentError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Default dispatcher: logs chat lines, records them in the history, and
/// saves attachments to disk.
pub struct ChatDispatcher {
    history: Arc<ChatHistory>,
    attachments: AttachmentStore,
}

impl ChatDispatcher {
    pub fn new(history: Arc<ChatHistory>, attachments: AttachmentStore) -> Self {
        Self {
            history,
            attachments,
        }
    }
}

fn save_attachment(
    store: &AttachmentStore,
    sender_name: &str,
    filename: Option<&str>,
    content: Option<&str>,
) {
    match store.save(filename, content) {
        Ok(path) => info!("saved as {}", path.display()),
        Err(e) => warn!("error saving file from {sender_name}: {e}"),
    }
}

impl MessageDispatcher for ChatDispatcher {
    fn dispatch(&self, mut envelope: Envelope) {
        let text = match envelope.kind {
            MessageType::Chat => {
                let content = envelope.content.take().unwrap_or_default();
                info!("[{}]: {}", envelope.sender_name, content);
                content
            }
            MessageType::File => {
                let filename = envelope
                    .filename
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_FILENAME.to_string());
                info!("[{}] sent file: {}", envelope.sender_name, filename);

                let store = self.attachments.clone();
                let sender_name = envelope.sender_name.clone();
                let raw_name = envelope.filename.take();
                let content = envelope.content.take();
                let job = move || {
                    save_attachment(
                        &store,
                        &sender_name,
                        raw_name.as_deref(),
                        content.as_deref(),
                    )
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn_blocking(job);
                    }
                    Err(_) => job(),
                }
                format!("sent file: {filename}")
            }
        };

        self.history.record(HistoryEntry {
            direction: Direction::Incoming,
            peer_name: envelope.sender_name,
            text,
            timestamp: envelope.timestamp,
        });
    }
}

/// Dispatcher that forwards every envelope to an unbounded channel.
///
/// Useful for front ends that consume messages on their own task.
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelDispatcher {
    /// Creates the dispatcher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageDispatcher for ChannelDispatcher {
    fn dispatch(&self, envelope: Envelope) {
        if self.tx.send(envelope).is_err() {
            warn!("message receiver dropped; discarding envelope");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anonbox_core::{Identity, PeerId};
    use uuid::Uuid;

    fn make_identity() -> Identity {
        Identity::with_id(PeerId::from_string("peer-1"), Some("Bob".to_string()))
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("anonbox_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    // ── sanitize_filename ─────────────────────────────────────────────────────

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename(".hidden"), ".hidden");
    }

    #[test]
    fn test_sanitize_strips_unix_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("/abs/path/a.txt"), "a.txt");
    }

    #[test]
    fn test_sanitize_strips_windows_traversal() {
        assert_eq!(sanitize_filename("..\\..\\win.ini"), "win.ini");
        assert_eq!(sanitize_filename("C:evil.txt"), "Cevil.txt");
    }

    #[test]
    fn test_sanitize_drops_control_characters() {
        assert_eq!(sanitize_filename("a\0b\n.txt"), "ab.txt");
    }

    #[test]
    fn test_sanitize_replaces_degenerate_names() {
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename("."), "attachment");
        assert_eq!(sanitize_filename(".."), "attachment");
        assert_eq!(sanitize_filename("dir/"), "attachment");
    }

    // ── AttachmentStore ───────────────────────────────────────────────────────

    #[test]
    fn test_save_writes_decoded_content_with_prefix() {
        // Arrange
        let dir = temp_dir();
        let store = AttachmentStore::new(&dir);

        // Act
        let path = store
            .save(Some("hello.txt"), Some(&STANDARD.encode(b"hello")))
            .unwrap();

        // Assert
        assert_eq!(path, dir.join("received_hello.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_never_escapes_download_dir() {
        let dir = temp_dir();
        let store = AttachmentStore::new(&dir);

        let path = store
            .save(Some("../../escape.txt"), Some(&STANDARD.encode(b"x")))
            .unwrap();

        assert_eq!(path.parent().unwrap(), dir.as_path());
        assert_eq!(path.file_name().unwrap(), "received_escape.txt");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_rejects_invalid_base64() {
        let dir = temp_dir();
        let store = AttachmentStore::new(&dir);

        let result = store.save(Some("bad.bin"), Some("***not base64***"));

        assert!(matches!(result, Err(AttachmentError::Decode(_))));
        assert!(!dir.join("received_bad.bin").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_target_path_uses_unknown_file_when_name_missing() {
        let store = AttachmentStore::new("/tmp/x");
        assert_eq!(
            store.target_path(None),
            PathBuf::from("/tmp/x/received_unknown_file")
        );
    }

    // ── ChatDispatcher ────────────────────────────────────────────────────────

    #[test]
    fn test_chat_dispatcher_records_chat_line() {
        // Arrange
        let history = Arc::new(ChatHistory::new(10));
        let dispatcher = ChatDispatcher::new(Arc::clone(&history), AttachmentStore::new("."));

        // Act
        dispatcher.dispatch(Envelope::chat(&make_identity(), "hi there"));

        // Assert
        let entries = history.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].peer_name, "Bob");
        assert_eq!(entries[0].text, "hi there");
        assert_eq!(entries[0].direction, Direction::Incoming);
    }

    #[test]
    fn test_chat_dispatcher_saves_file_envelope() {
        let dir = temp_dir();
        let history = Arc::new(ChatHistory::new(10));
        let dispatcher = ChatDispatcher::new(Arc::clone(&history), AttachmentStore::new(&dir));
        let envelope = Envelope::new(
            &make_identity(),
            MessageType::File,
            Some(STANDARD.encode(b"file body")),
            Some("doc.txt".to_string()),
        );

        dispatcher.dispatch(envelope);

        assert_eq!(
            std::fs::read(dir.join("received_doc.txt")).unwrap(),
            b"file body"
        );
        assert_eq!(history.snapshot()[0].text, "sent file: doc.txt");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_chat_dispatcher_saves_file_off_the_async_worker() {
        // Arrange
        let dir = temp_dir();
        let history = Arc::new(ChatHistory::new(10));
        let dispatcher = ChatDispatcher::new(Arc::clone(&history), AttachmentStore::new(&dir));
        let body = vec![0x5A; 256 * 1024];
        let envelope = Envelope::new(
            &make_identity(),
            MessageType::File,
            Some(STANDARD.encode(&body)),
            Some("large.bin".to_string()),
        );
        let target = dir.join("received_large.bin");

        // Act
        dispatcher.dispatch(envelope);

        // Assert: history is recorded at once, the file lands shortly after.
        assert_eq!(history.snapshot()[0].text, "sent file: large.bin");
        let written = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(bytes) = tokio::fs::read(&target).await {
                    if bytes.len() == body.len() {
                        return bytes;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("attachment was never written");
        assert_eq!(written, body);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_channel_dispatcher_forwards_envelope() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();

        dispatcher.dispatch(Envelope::chat(&make_identity(), "queued"));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.content.as_deref(), Some("queued"));
    }

    #[test]
    fn test_channel_dispatcher_survives_dropped_receiver() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        drop(rx);
        dispatcher.dispatch(Envelope::chat(&make_identity(), "lost"));
    }
}
