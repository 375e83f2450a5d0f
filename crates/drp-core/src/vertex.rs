//! Layer 4: Vertices
//!
//! Immutable once admitted. The hash is a content address over the
//! canonical JSON of `{deps, operation, peerId, timestamp}`; equal hash
//! implies equal vertex on every peer.

use serde::{Deserialize, Serialize};

use crate::hash::{Hash, sha256_bytes};
use crate::identity::PeerId;
use crate::json_canon::{CanonJsonError, to_canon_json_bytes};
use crate::operation::Operation;
use crate::time::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    hash: Hash,
    #[serde(rename = "peerId")]
    peer_id: PeerId,
    operation: Option<Operation>,
    dependencies: Vec<Hash>,
    timestamp: Timestamp,
    #[serde(default, with = "signature_hex")]
    signature: Vec<u8>,
}

#[derive(Serialize)]
struct HashPreimage<'a> {
    deps: &'a [Hash],
    operation: Option<&'a Operation>,
    #[serde(rename = "peerId")]
    peer_id: &'a PeerId,
    timestamp: Timestamp,
}

impl Vertex {
    /// Build a vertex with a freshly computed content hash and no signature.
    pub fn new(
        peer_id: PeerId,
        operation: Option<Operation>,
        dependencies: Vec<Hash>,
        timestamp: Timestamp,
    ) -> Result<Self, CanonJsonError> {
        let hash = Self::compute_hash(&peer_id, operation.as_ref(), &dependencies, timestamp)?;
        Ok(Self {
            hash,
            peer_id,
            operation,
            dependencies,
            timestamp,
            signature: Vec::new(),
        })
    }

    /// Reassemble a vertex received off the wire. The hash is taken as
    /// claimed; validation recomputes it before admission.
    pub fn from_parts(
        hash: Hash,
        peer_id: PeerId,
        operation: Option<Operation>,
        dependencies: Vec<Hash>,
        timestamp: Timestamp,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            hash,
            peer_id,
            operation,
            dependencies,
            timestamp,
            signature,
        }
    }

    /// The distinguished root: empty deps, sentinel operation, time zero.
    /// Identical on every peer.
    pub fn root() -> Self {
        let peer_id = PeerId::sentinel();
        let operation = Some(Operation::root_sentinel());
        let hash = Self::compute_hash(&peer_id, operation.as_ref(), &[], Timestamp::ZERO)
            .unwrap_or_else(|_| sha256_bytes(b"drp-root"));
        Self {
            hash,
            peer_id,
            operation,
            dependencies: Vec::new(),
            timestamp: Timestamp::ZERO,
            signature: Vec::new(),
        }
    }

    pub fn compute_hash(
        peer_id: &PeerId,
        operation: Option<&Operation>,
        dependencies: &[Hash],
        timestamp: Timestamp,
    ) -> Result<Hash, CanonJsonError> {
        let preimage = HashPreimage {
            deps: dependencies,
            operation,
            peer_id,
            timestamp,
        };
        Ok(sha256_bytes(&to_canon_json_bytes(&preimage)?))
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    pub fn dependencies(&self) -> &[Hash] {
        &self.dependencies
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Attach an opaque signature blob. Verification is a collaborator
    /// concern; the signature is not part of the hash preimage.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }
}

mod signature_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            hex.push_str(&format!("{byte:02x}"));
        }
        ser.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(de)?;
        if hex.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length signature hex"));
        }
        hex.as_bytes()
            .chunks(2)
            .map(|pair| {
                let pair = std::str::from_utf8(pair)
                    .map_err(|_| serde::de::Error::custom("not ascii hex"))?;
                u8::from_str_radix(pair, 16).map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
