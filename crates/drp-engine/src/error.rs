//! Engine errors and the per-vertex validation refusals.

use thiserror::Error;

use drp_core::{CanonJsonError, DrpKind, GraphError, Hash, PeerId, Timestamp};

use crate::drp::DrpError;

/// Why a vertex failed validation. Merge folds these into the `missing`
/// set instead of propagating.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("vertex {vertex} hash does not match its content (recomputed {recomputed})")]
    HashMismatch { vertex: Hash, recomputed: Hash },
    #[error("vertex {vertex} carries no operation")]
    MissingOperation { vertex: Hash },
    #[error("vertex {vertex} has no dependencies")]
    MissingDependencies { vertex: Hash },
    #[error("vertex {vertex} depends on unknown vertex {dependency}")]
    UnknownDependency { vertex: Hash, dependency: Hash },
    #[error("vertex {vertex} is older than its dependency {dependency}")]
    TimestampOrder { vertex: Hash, dependency: Hash },
    #[error("vertex {vertex} is from the future ({timestamp} > {now})")]
    FutureTimestamp {
        vertex: Hash,
        timestamp: Timestamp,
        now: Timestamp,
    },
    #[error("peer {peer} is not a writer for vertex {vertex}")]
    PermissionDenied { vertex: Hash, peer: PeerId },
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("construction failed: {0}")]
    Construction(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Operation(#[from] DrpError),
    #[error(transparent)]
    Encoding(#[from] CanonJsonError),
    /// A state cache entry that must exist is gone. Internal bug; fatal.
    #[error("missing cached {kind:?} state at {hash}")]
    State { kind: DrpKind, hash: Hash },
}

impl EngineError {
    /// Merge folds recoverable per-vertex failures into `missing`; a state
    /// fault aborts the batch instead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::State { .. })
    }
}
