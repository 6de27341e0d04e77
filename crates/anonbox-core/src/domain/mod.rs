//! Domain entities for AnonBox.
//!
//! This module contains pure logic with no infrastructure dependencies: the
//! local node identity and the table of peers learned from discovery.
//!
//! Code in outer layers (network, storage, the binary) depends on the domain,
//! but the domain never depends on them.

/// The local node identity, generated once per process.
pub mod identity;

/// The table of discovered peers, keyed by discovery name.
pub mod registry;
