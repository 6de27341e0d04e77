//! anonbox-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does a node do? (for beginners)
//!
//! A node is one running AnonBox instance.  It:
//!
//! 1. Generates a fresh identity and (optionally) derives an encryption key
//!    from a shared passphrase.
//! 2. Binds a TCP listener on an ephemeral port and accepts one framed
//!    message per connection.
//! 3. Advertises itself on the LAN and builds a table of other nodes from
//!    their advertisements.
//! 4. Sends chat lines and file attachments to a single peer or to every
//!    known peer, opening a fresh connection for each message.
//!
//! Nothing is persisted: stopping the node forgets every peer and message.

/// Application layer: dispatch boundary, attachments, history, peer table.
pub mod application;

/// Infrastructure layer: sockets, discovery, configuration, node runtime.
pub mod infrastructure;
