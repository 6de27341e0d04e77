//! Local node identity.
//!
//! An [`Identity`] is created once at startup and never changes afterwards.
//! Because AnonBox is amnesic, a new identity is generated on every launch:
//! peers cannot correlate two sessions of the same user.
//!
//! The identifier is a random 128-bit value (a UUID v4).  On the wire and in
//! discovery properties it is always carried in its hyphenated string form,
//! and self-filtering compares that string exactly.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of leading hex characters of the id used in the default display name.
const DEFAULT_NAME_ID_CHARS: usize = 6;

/// A peer identifier as transmitted on the wire.
///
/// Wraps the string form rather than a parsed [`Uuid`] because remote peers
/// are untrusted: whatever string they advertise is kept verbatim so that
/// equality checks stay byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a new random peer id (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing string, e.g. one read from a discovery record.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns at most the first `n` characters, used for short labels.
    pub fn short(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The local node's identity: a random id and a human-readable display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: PeerId,
    display_name: String,
}

impl Identity {
    /// Generates a fresh identity.
    ///
    /// When `display_name` is `None` (or blank) the name defaults to
    /// `"Anon-"` followed by the first six hex characters of the id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use anonbox_core::Identity;
    ///
    /// let me = Identity::generate(None);
    /// assert!(me.display_name().starts_with("Anon-"));
    /// assert_eq!(me.display_name().len(), "Anon-".len() + 6);
    ///
    /// let bob = Identity::generate(Some("Bob".to_string()));
    /// assert_eq!(bob.display_name(), "Bob");
    /// ```
    pub fn generate(display_name: Option<String>) -> Self {
        Self::with_id(PeerId::generate(), display_name)
    }

    /// Builds an identity around a known id.
    pub fn with_id(id: PeerId, display_name: Option<String>) -> Self {
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Anon-{}", id.short(DEFAULT_NAME_ID_CHARS)));
        Self { id, display_name }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_ids() {
        // Arrange / Act
        let a = Identity::generate(None);
        let b = Identity::generate(None);

        // Assert
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_generated_id_is_a_hyphenated_uuid() {
        let identity = Identity::generate(None);
        let parsed = Uuid::parse_str(identity.id().as_str());
        assert!(parsed.is_ok(), "id must be a valid UUID string");
        assert_eq!(identity.id().as_str().len(), 36);
    }

    #[test]
    fn test_default_display_name_uses_first_six_id_chars() {
        // Arrange
        let id = PeerId::from_string("abcdef12-3456-4789-8abc-def012345678");

        // Act
        let identity = Identity::with_id(id, None);

        // Assert
        assert_eq!(identity.display_name(), "Anon-abcdef");
    }

    #[test]
    fn test_supplied_display_name_is_kept() {
        let identity = Identity::generate(Some("Alice".to_string()));
        assert_eq!(identity.display_name(), "Alice");
    }

    #[test]
    fn test_blank_display_name_falls_back_to_default() {
        let identity = Identity::generate(Some("   ".to_string()));
        assert!(identity.display_name().starts_with("Anon-"));
    }

    #[test]
    fn test_short_returns_whole_string_when_shorter_than_n() {
        let id = PeerId::from_string("abc");
        assert_eq!(id.short(8), "abc");
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let id = PeerId::from_string("peer-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"peer-1\"");
    }
}
