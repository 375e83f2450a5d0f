//! Layer 1: Identity atoms
//!
//! PeerId: peer self-identification.
//! ObjectId: replicated-object identity, sha256-hex.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::InvalidId;
use crate::hash::sha256_bytes;

/// Peer identifier - non-empty string after trimming.
///
/// Peers name themselves. Validation only rejects empty/whitespace-only
/// values; everything else (key fingerprints, multiaddrs) is opaque here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.trim().is_empty() {
            Err(InvalidId::Peer {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root vertex carries no author.
    pub(crate) fn sentinel() -> Self {
        Self(String::new())
    }

    #[cfg(any(test, feature = "test-harness"))]
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:?})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PeerId {
    type Error = InvalidId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        PeerId::new(s)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> String {
        id.0
    }
}

/// Replicated-object identifier.
///
/// Either supplied verbatim by the embedder or derived from the creating
/// peer and a 16-byte nonce from the OS RNG.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn from_raw(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.trim().is_empty() {
            Err(InvalidId::Object {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    /// Derive a fresh id: sha256-hex of `peer_id || nonce`, nonce hex-encoded.
    pub fn generate(peer_id: &PeerId) -> Self {
        let mut nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self::derive(peer_id, &nonce)
    }

    pub fn derive(peer_id: &PeerId, nonce: &[u8; 16]) -> Self {
        let mut preimage = Vec::with_capacity(peer_id.as_str().len() + 32);
        preimage.extend_from_slice(peer_id.as_str().as_bytes());
        for byte in nonce {
            preimage.extend_from_slice(format!("{byte:02x}").as_bytes());
        }
        Self(sha256_bytes(&preimage).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
