//! Application layer for the node.
//!
//! Contains the use cases that sit between the network and whatever front end
//! consumes messages.
//!
//! - **`receive_message`** – The [`receive_message::MessageDispatcher`]
//!   boundary invoked for every decoded envelope, plus the default dispatcher
//!   that records chat lines and saves attachments.
//! - **`history`** – Amnesic, bounded, in-memory chat log.
//! - **`track_peers`** – The shared peer table and the single task that
//!   applies discovery updates to it.
//!
//! **Dependency rule**: this layer may depend on `anonbox_core`, but MUST NOT
//! import from `infrastructure`.

pub mod history;
pub mod receive_message;
pub mod track_peers;
