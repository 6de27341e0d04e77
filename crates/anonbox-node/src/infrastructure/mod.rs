//! Infrastructure layer for the node.
//!
//! Contains OS-facing adapters: TCP listener and sender, LAN discovery,
//! configuration files, and the runtime that wires them into a running node.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `anonbox_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod runtime;
pub mod storage;
