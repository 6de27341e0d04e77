//! Network infrastructure for the node.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Advertises the local service record and browses for
//!   other peers via UDP datagrams on the LAN.  Emits added/updated/removed
//!   events on an async channel.
//!
//! - **`listener`** – Accepts inbound TCP connections and runs the per-connection
//!   read → decrypt → dispatch state machine.
//!
//! - **`local_addr`** – Best-effort discovery of the address other hosts can
//!   reach us on.
//!
//! - **`sender`** – One-shot outbound connections: seal an envelope, write one
//!   frame, close.

pub mod discovery;
pub mod listener;
pub mod local_addr;
pub mod sender;
