//! Finality bookkeeping.
//!
//! Each admitted vertex freezes its required signer set from the ACL
//! reconstructed at that vertex. Attestations arrive later from collaborator
//! components; a vertex is final once a threshold quorum of its signers has
//! attested.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use drp_core::Hash;

pub const DEFAULT_FINALITY_THRESHOLD: f64 = 0.51;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum FinalityError {
    #[error("no finality entry for vertex {hash}")]
    UnknownVertex { hash: Hash },
}

/// Signer set frozen at admission plus attestations collected so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityState {
    signers: BTreeSet<String>,
    attestations: BTreeSet<String>,
}

impl FinalityState {
    pub fn signers(&self) -> &BTreeSet<String> {
        &self.signers
    }

    pub fn attestations(&self) -> &BTreeSet<String> {
        &self.attestations
    }
}

#[derive(Clone, Debug)]
pub struct FinalityStore {
    entries: BTreeMap<Hash, FinalityState>,
    threshold: f64,
}

impl FinalityStore {
    pub fn new(threshold: f64) -> Self {
        Self {
            entries: BTreeMap::new(),
            threshold,
        }
    }

    /// Create the entry for a freshly admitted vertex. Signers are fixed
    /// here and never change afterwards; re-initialization is a no-op.
    pub fn init(&mut self, hash: Hash, signers: BTreeSet<String>) {
        self.entries.entry(hash).or_insert(FinalityState {
            signers,
            attestations: BTreeSet::new(),
        });
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn signers(&self, hash: &Hash) -> Option<&BTreeSet<String>> {
        self.entries.get(hash).map(FinalityState::signers)
    }

    /// Record an attestation. Returns whether it counted: attestations from
    /// peers outside the frozen signer set are ignored.
    pub fn add_attestation(
        &mut self,
        hash: &Hash,
        signer: impl Into<String>,
    ) -> Result<bool, FinalityError> {
        let entry = self
            .entries
            .get_mut(hash)
            .ok_or(FinalityError::UnknownVertex { hash: *hash })?;
        let signer = signer.into();
        if !entry.signers.contains(&signer) {
            return Ok(false);
        }
        Ok(entry.attestations.insert(signer))
    }

    pub fn add_attestations<I, S>(&mut self, hash: &Hash, signers: I) -> Result<usize, FinalityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut counted = 0;
        for signer in signers {
            if self.add_attestation(hash, signer)? {
                counted += 1;
            }
        }
        Ok(counted)
    }

    pub fn attestation_count(&self, hash: &Hash) -> Result<usize, FinalityError> {
        self.entries
            .get(hash)
            .map(|entry| entry.attestations.len())
            .ok_or(FinalityError::UnknownVertex { hash: *hash })
    }

    /// Quorum size for a vertex: ceil(threshold x signer count).
    pub fn required(&self, hash: &Hash) -> Result<usize, FinalityError> {
        let entry = self
            .entries
            .get(hash)
            .ok_or(FinalityError::UnknownVertex { hash: *hash })?;
        Ok((self.threshold * entry.signers.len() as f64).ceil() as usize)
    }

    /// An empty signer set is vacuously final.
    pub fn is_finalized(&self, hash: &Hash) -> Result<bool, FinalityError> {
        let entry = self
            .entries
            .get(hash)
            .ok_or(FinalityError::UnknownVertex { hash: *hash })?;
        Ok(entry.attestations.len() >= (self.threshold * entry.signers.len() as f64).ceil() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drp_core::sha256_bytes;

    fn signers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quorum_threshold_arithmetic() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"v1");
        store.init(hash, signers(&["a", "b", "c"]));

        assert_eq!(store.required(&hash).unwrap(), 2);
        assert!(!store.is_finalized(&hash).unwrap());

        assert!(store.add_attestation(&hash, "a").unwrap());
        assert!(!store.is_finalized(&hash).unwrap());
        assert!(store.add_attestation(&hash, "b").unwrap());
        assert!(store.is_finalized(&hash).unwrap());
    }

    #[test]
    fn non_signers_and_duplicates_do_not_count() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"v1");
        store.init(hash, signers(&["a"]));

        assert!(!store.add_attestation(&hash, "stranger").unwrap());
        assert!(store.add_attestation(&hash, "a").unwrap());
        assert!(!store.add_attestation(&hash, "a").unwrap());
        assert_eq!(store.attestation_count(&hash).unwrap(), 1);
    }

    #[test]
    fn batch_attestations_count_only_new_known_signers() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"v1");
        store.init(hash, signers(&["a", "b"]));

        let counted = store
            .add_attestations(&hash, ["a", "b", "a", "stranger"])
            .unwrap();
        assert_eq!(counted, 2);
        assert!(store.is_finalized(&hash).unwrap());
    }

    #[test]
    fn empty_signer_set_is_vacuously_final() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"v1");
        store.init(hash, BTreeSet::new());
        assert!(store.is_finalized(&hash).unwrap());
    }

    #[test]
    fn signers_are_frozen_at_init() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"v1");
        store.init(hash, signers(&["a"]));
        store.init(hash, signers(&["a", "b", "c"]));
        assert_eq!(store.signers(&hash), Some(&signers(&["a"])));
    }

    #[test]
    fn unknown_vertex_errors() {
        let mut store = FinalityStore::new(DEFAULT_FINALITY_THRESHOLD);
        let hash = sha256_bytes(b"nope");
        assert!(matches!(
            store.add_attestation(&hash, "a"),
            Err(FinalityError::UnknownVertex { .. })
        ));
    }
}
