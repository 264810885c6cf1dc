//! 128-bit Message-ID digests used for threading.

use std::fmt;

use sha2::{Digest, Sha256};

/// A 128-bit digest of a normalized Message-ID.
///
/// The id is hashed without its angle brackets and surrounding whitespace,
/// so `<a@b>` and ` a@b ` produce the same value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageIdHash(pub [u8; 16]);

impl MessageIdHash {
    /// Hash a raw Message-ID token. Returns `None` for empty ids.
    pub fn from_id(id: &str) -> Option<Self> {
        let normalized = id.trim().trim_start_matches('<').trim_end_matches('>').trim();
        if normalized.is_empty() {
            return None;
        }
        let digest = Sha256::digest(normalized.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for MessageIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageIdHash({self})")
    }
}

impl fmt::Display for MessageIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brackets_are_ignored() {
        assert_eq!(
            MessageIdHash::from_id("<msg001@example.com>"),
            MessageIdHash::from_id(" msg001@example.com ")
        );
    }

    #[test]
    fn test_empty_id() {
        assert!(MessageIdHash::from_id("<>").is_none());
        assert!(MessageIdHash::from_id("   ").is_none());
    }

    #[test]
    fn test_distinct_ids_differ() {
        assert_ne!(
            MessageIdHash::from_id("<a@example.com>"),
            MessageIdHash::from_id("<b@example.com>")
        );
    }

    #[test]
    fn test_display_is_hex() {
        let hash = MessageIdHash([0xab; 16]);
        assert_eq!(hash.to_string(), "ab".repeat(16));
    }
}
