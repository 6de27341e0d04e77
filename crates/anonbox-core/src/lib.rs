//! # anonbox-core
//!
//! Shared library for AnonBox, a local-network, amnesic peer-to-peer chat tool.
//! It holds the local identity, the peer registry, the framed wire protocol,
//! and the passphrase-based payload encryption.
//!
//! This crate has zero dependencies on network sockets, the file system, or an
//! async runtime, so everything here is testable in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! Every AnonBox instance ("node") advertises itself on the LAN, learns about
//! other nodes from their advertisements, and exchanges one message per TCP
//! connection.  Nothing is ever written to disk except explicitly received
//! file attachments.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`domain`** – Who we are (`Identity`) and who we know about
//!   (`PeerRegistry`).  Our own advertisement is never stored as a peer.
//!
//! - **`protocol`** – What travels over the wire.  An [`Envelope`] is encoded
//!   to JSON text, sealed by the [`SecurityContext`], and prefixed with a
//!   4-byte big-endian length to form a frame.
//!
//! - **`security`** – AES-256-GCM sealing with a key derived from a shared
//!   passphrase.  Without a passphrase the layer is a passthrough.

pub mod domain;
pub mod protocol;
pub mod security;

// Re-export the most-used types at the crate root so callers can write
// `anonbox_core::Envelope` instead of `anonbox_core::protocol::envelope::Envelope`.
pub use domain::identity::{Identity, PeerId};
pub use domain::registry::{PeerRecord, PeerRegistry};
pub use protocol::envelope::{current_timestamp, Envelope, MessageType};
pub use protocol::frame::{
    decode_frame, encode_frame, parse_length_prefix, ProtocolError, DEFAULT_MAX_FRAME_BYTES,
    LENGTH_PREFIX_SIZE,
};
pub use security::{SecurityContext, SecurityError};
