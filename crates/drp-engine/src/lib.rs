//! Replicated-object engine over a content-addressed hash graph.
//!
//! A DRP (distributed replicated-object protocol) object is a user-defined
//! data structure whose mutations become vertices in a hash graph. Peers
//! apply operations locally and merge remote vertices; the engine
//! deterministically reconstructs state at any causal cut by linearizing
//! the implied operations, with concurrent operations settled by the
//! object's own conflict resolver. A companion ACL, itself a DRP on the
//! same graph, gates write permission and names finality signers.

#![forbid(unsafe_code)]

pub mod acl;
pub mod drp;
pub mod error;
pub mod finality;
pub mod object;

pub use acl::Acl;
pub use drp::{Drp, DrpError, DrpState};
pub use error::{EngineError, ValidationError};
pub use finality::{DEFAULT_FINALITY_THRESHOLD, FinalityError, FinalityState, FinalityStore};
pub use object::{DrpObject, DrpObjectOptions, EngineConfig, Origin, Subscriber};

pub use drp_core::{
    ConflictResolver, DrpKind, GraphError, Hash, HashGraph, ObjectId, Operation, PeerId,
    QUERY_PREFIX, Semantics, Timestamp, Verdict, Vertex,
};
