use crate::errors::{GitError, Result};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// Length of a raw SHA-1 identifier in bytes.
pub const ID_RAW_LEN: usize = 20;
/// Length of a hex-encoded identifier.
pub const ID_HEX_LEN: usize = 40;

/// A 20-byte SHA-1 object identifier.
///
/// Carried in raw form; converts losslessly to and from the 40-character
/// lowercase hexadecimal form used for map keys and wire lines. Ordering is
/// byte-lexicographic, which is also the sort order of the pack index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ID_RAW_LEN]);

impl ObjectId {
    pub const fn from_raw(raw: [u8; ID_RAW_LEN]) -> Self {
        ObjectId(raw)
    }

    /// Reads an identifier from a 20-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ID_RAW_LEN] = bytes
            .try_into()
            .map_err(|_| GitError::bad_format(format!("object id must be {ID_RAW_LEN} bytes, got {}", bytes.len())))?;
        Ok(ObjectId(raw))
    }

    /// Reads an identifier from its 40-character hexadecimal form.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != ID_HEX_LEN {
            return Err(GitError::bad_format(format!(
                "object id must be {ID_HEX_LEN} hex characters, got {}",
                hex_str.len()
            )));
        }
        let raw = hex::decode(hex_str)
            .map_err(|_| GitError::bad_format(format!("invalid hex in object id: {hex_str}")))?;
        Self::from_bytes(&raw)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ID_RAW_LEN] {
        &self.0
    }

    /// The first byte of the identifier, which selects the fanout bucket.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Computes the SHA-1 over raw bytes and returns it as an identifier.
pub fn sha1_digest(data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(data);
    ObjectId(hasher.finalize().into())
}

/// Whether `s` looks like a full lowercase hexadecimal identifier.
///
/// Anything else must go through reference resolution.
pub fn is_hex_id(s: &str) -> bool {
    s.len() == ID_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hex_form = "8ba2247ab0a7fca6750be46db85f80344ae0df44";
        let id = ObjectId::from_hex(hex_form).unwrap();
        assert_eq!(id.to_hex(), hex_form);
        assert_eq!(id.first_byte(), 0x8b);
        assert_eq!(ObjectId::from_bytes(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(ObjectId::from_hex("8ba2").is_err());
        assert!(ObjectId::from_hex(&"zz".repeat(20)).is_err());
    }

    #[test]
    fn test_is_hex_id() {
        assert!(is_hex_id("8ba2247ab0a7fca6750be46db85f80344ae0df44"));
        assert!(!is_hex_id("refs/heads/main"));
        assert!(!is_hex_id("8BA2247AB0A7FCA6750BE46DB85F80344AE0DF44"));
        assert!(!is_hex_id("8ba2247a"));
    }

    #[test]
    fn test_ordering_is_byte_lexicographic() {
        let a = ObjectId::from_raw([0x00; 20]);
        let b = ObjectId::from_raw([0xff; 20]);
        assert!(a < b);
    }
}
