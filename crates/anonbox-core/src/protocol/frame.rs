//! Length-prefixed framing for the AnonBox wire protocol.
//!
//! Wire format (one frame per TCP connection):
//! ```text
//! [length:4][payload:length]
//! ```
//! `length` is a big-endian `u32`.  The payload is `nonce(12) || ciphertext ||
//! tag(16)` when a passphrase is configured, or the raw envelope text otherwise.
//!
//! Framing is deliberately independent of encryption: the length always counts
//! the bytes that follow on the wire, whatever they contain.

use thiserror::Error;

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a declared payload length (64 MiB).
///
/// A peer that declares more than this is treated as malformed and the body is
/// never read, so a bogus prefix cannot make the receiver allocate gigabytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Errors that can occur while encoding or decoding frames and envelopes.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload does not fit in a `u32` length prefix or exceeds the limit.
    #[error("frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Fewer bytes are available than the frame requires.
    #[error("truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The decrypted payload is not a valid envelope.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Prefixes `payload` with its 4-byte big-endian length.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload length does not fit
/// in a `u32`.
///
/// # Examples
///
/// ```rust
/// use anonbox_core::protocol::frame::{encode_frame, parse_length_prefix};
///
/// let frame = encode_frame(b"hello").unwrap();
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
/// assert_eq!(parse_length_prefix(&frame, usize::MAX).unwrap(), 5);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reads the declared payload length from the first four bytes of `bytes`.
///
/// # Errors
///
/// - [`ProtocolError::Truncated`] when fewer than four bytes are available.
/// - [`ProtocolError::FrameTooLarge`] when the declared length exceeds `max_len`.
pub fn parse_length_prefix(bytes: &[u8], max_len: usize) -> Result<usize, ProtocolError> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or(ProtocolError::Truncated {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        })?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }
    Ok(len)
}

/// Splits one complete frame off the front of `bytes`.
///
/// Returns the payload slice and the total number of bytes consumed
/// (prefix + payload).
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if the buffer ends before the declared
/// payload does, or [`ProtocolError::FrameTooLarge`] per [`parse_length_prefix`].
pub fn decode_frame(bytes: &[u8], max_len: usize) -> Result<(&[u8], usize), ProtocolError> {
    let len = parse_length_prefix(bytes, max_len)?;
    let total = LENGTH_PREFIX_SIZE + len;
    if bytes.len() < total {
        return Err(ProtocolError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }
    Ok((&bytes[LENGTH_PREFIX_SIZE..total], total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
