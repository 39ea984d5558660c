//! ObjectKey: BLAKE3 of the object bytes, truncated to 128 bits (32 hex chars).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KEY_HEX_LEN: usize = 32;

/// Content-derived key of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid object key length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in object key")]
    InvalidHex,
}

impl ObjectKey {
    /// Derive the key for a payload.
    pub fn for_bytes(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        Self(hex::encode(&digest.as_bytes()[..KEY_HEX_LEN / 2]))
    }

    /// Validate and normalize a key received from elsewhere.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.len() != KEY_HEX_LEN {
            return Err(KeyError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeyError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Shard directory (first two hex chars).
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// File name inside the shard directory.
    pub fn leaf(&self) -> &str {
        &self.0[2..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape() {
        let key = ObjectKey::for_bytes(b"segment payload");
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(format!("{}{}", key.shard(), key.leaf()), key.as_str());
    }

    #[test]
    fn test_same_bytes_same_key() {
        assert_eq!(ObjectKey::for_bytes(b"a"), ObjectKey::for_bytes(b"a"));
        assert_ne!(ObjectKey::for_bytes(b"a"), ObjectKey::for_bytes(b"b"));
    }

    #[test]
    fn test_parse_normalizes_case() {
        let key: ObjectKey = "ABCDEF01234567890123456789ABCDEF".parse().unwrap();
        assert_eq!(key.as_str(), "abcdef01234567890123456789abcdef");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(ObjectKey::parse("abc"), Err(KeyError::InvalidLength(3))));
        assert!(matches!(
            ObjectKey::parse("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(KeyError::InvalidHex)
        ));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = ObjectKey::for_bytes(b"json");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
    }
}
