//! Storage infrastructure: configuration file persistence.
//!
//! The node is amnesic: messages and peers are never written to disk.  The
//! only persisted state is the TOML configuration handled by `config`
//! (plus attachments the user explicitly receives, see
//! `application::receive_message`).

pub mod config;
