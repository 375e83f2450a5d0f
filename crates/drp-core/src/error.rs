//! Core errors (identity parsing, hash parsing, graph invariants).
//!
//! These are bounded and stable: they represent domain refusal states,
//! not library implementation details.

use thiserror::Error;

use crate::hash::Hash;

/// Invalid identifier at a parse boundary.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("peer id `{raw}` is invalid: {reason}")]
    Peer { raw: String, reason: String },
    #[error("object id `{raw}` is invalid: {reason}")]
    Object { raw: String, reason: String },
}

/// Invalid content hash at a parse boundary.
#[derive(Debug, Error, Clone)]
#[error("hash `{raw}` is invalid: {reason}")]
pub struct InvalidHash {
    pub raw: String,
    pub reason: String,
}

/// Hash graph structural violations.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum GraphError {
    #[error("vertex {vertex} depends on unknown vertex {dependency}")]
    UnknownDependency { vertex: Hash, dependency: Hash },
    #[error("vertex {vertex} is already present")]
    DuplicateVertex { vertex: Hash },
    #[error("vertex {hash} is not in the graph")]
    UnknownVertex { hash: Hash },
    #[error("ancestor query over an empty head set")]
    EmptyHeadSet,
}
