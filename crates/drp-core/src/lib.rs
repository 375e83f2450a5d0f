//! Core domain types for the DRP object engine.
//!
//! Module hierarchy follows type dependency order:
//! - time: wall-clock timestamp primitives (Layer 0)
//! - identity: PeerId, ObjectId (Layer 1)
//! - json_canon: canonical JSON bytes for hashing (Layer 2)
//! - hash: content address over the canonical preimage (Layer 2)
//! - operation: DrpKind, Operation (Layer 3)
//! - vertex: immutable Vertex, root sentinel (Layer 4)
//! - graph: HashGraph with frontier, LCA, ancestor queries (Layer 5)
//! - linearize: deterministic linearization with conflict resolution (Layer 6)

#![forbid(unsafe_code)]

pub mod error;
pub mod graph;
pub mod hash;
pub mod identity;
pub mod json_canon;
pub mod linearize;
pub mod operation;
pub mod time;
pub mod vertex;

pub use error::{GraphError, InvalidHash, InvalidId};
pub use graph::HashGraph;
pub use hash::{Hash, sha256_bytes};
pub use identity::{ObjectId, PeerId};
pub use json_canon::{CanonJsonError, to_canon_json_bytes};
pub use linearize::{ConflictResolver, Semantics, Verdict, linearize};
pub use operation::{DrpKind, Operation, QUERY_PREFIX};
pub use time::{Timestamp, WallClockSource};
pub use vertex::Vertex;

#[cfg(any(test, feature = "test-harness"))]
pub use time::{FixedClock, WallClockGuard, set_wall_clock_source_for_tests};
