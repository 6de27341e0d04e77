//! Protocol module: the logical message ([`envelope`]) and its wire framing ([`frame`]).
//!
//! A message travels through three representations:
//!
//! ```text
//! Envelope ──serde_json──► UTF-8 text ──SecurityContext──► payload ──frame──► [len:4][payload:len]
//! ```
//!
//! Decoding reverses the chain.  Encryption lives in [`crate::security`]; this
//! module only deals with the text encoding and the length prefix.

pub mod envelope;
pub mod frame;

pub use envelope::{Envelope, MessageType};
pub use frame::{
    decode_frame, encode_frame, parse_length_prefix, ProtocolError, DEFAULT_MAX_FRAME_BYTES,
    LENGTH_PREFIX_SIZE,
};
