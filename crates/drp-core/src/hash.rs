//! Layer 2: Content hash
//!
//! 32-byte SHA-256 digest over a canonical encoding. The byte-wise `Ord`
//! is identical to lexicographic order of the lowercase-hex form, which is
//! the tie-break order every deterministic algorithm in this crate uses.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::InvalidHash;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidHash> {
        if raw.len() != 64 {
            return Err(InvalidHash {
                raw: raw.to_string(),
                reason: format!("expected 64 hex characters, got {}", raw.len()),
            });
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in raw.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| InvalidHash {
                raw: raw.to_string(),
                reason: "not ascii hex".to_string(),
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| InvalidHash {
                raw: raw.to_string(),
                reason: format!("bad hex pair `{pair}`"),
            })?;
        }
        Ok(Self(bytes))
    }
}

pub fn sha256_bytes(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&hasher.finalize());
    Hash(buf)
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl From<Hash> for String {
    fn from(hash: Hash) -> String {
        hash.to_string()
    }
}

impl TryFrom<String> for Hash {
    type Error = InvalidHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Hash::parse(&value)
    }
}
