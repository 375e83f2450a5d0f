//! The DRP contract: what the engine expects from a replicated object.
//!
//! A DRP is a value with named mutating operations, `query_*` reads, a
//! conflict policy, and a typed state snapshot. The engine never touches
//! its internals; everything flows through this trait.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use drp_core::{ConflictResolver, Operation, Semantics, Verdict};

/// Operation dispatch failures inside a DRP.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum DrpError {
    #[error("unknown operation `{op_type}`")]
    UnknownOperation { op_type: String },
    #[error("bad arguments for `{op_type}`: {reason}")]
    BadArguments { op_type: String, reason: String },
    #[error("operation rejected: {reason}")]
    Rejected { reason: String },
}

/// Typed state snapshot of a DRP: ordered `(key, value)` entries with
/// unique keys. Canonical equality is entry-sequence equality; this is the
/// record the per-vertex caches store and reconstruction assigns back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrpState {
    entries: Vec<(String, Value)>,
}

impl DrpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace; replacement keeps the entry's position so the
    /// canonical entry order is stable.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A replicated object the engine can drive.
///
/// `apply` dispatches a mutating operation by its dotted path; `query`
/// dispatches a pure `query_*` read and must not mutate. `state` and
/// `set_state` snapshot and restore the non-function attributes; `set_state`
/// assigns only the keys present in the record, leaving defaults alone.
pub trait Drp {
    fn semantics(&self) -> Semantics;

    fn resolve_pair(&self, _left: &Operation, _right: &Operation) -> Verdict {
        Verdict::NoConflict
    }

    fn resolve_many(&self, ops: &[Operation]) -> Vec<usize> {
        (0..ops.len()).collect()
    }

    fn apply(&mut self, op_type: &str, args: &[Value]) -> Result<Value, DrpError>;

    fn query(&self, op_type: &str, args: &[Value]) -> Result<Value, DrpError>;

    fn state(&self) -> DrpState;

    fn set_state(&mut self, state: &DrpState);

    fn clone_box(&self) -> Box<dyn Drp>;
}

impl Clone for Box<dyn Drp> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Resolver view over a DRP for the linearizer.
pub(crate) struct DrpResolver<'a>(pub &'a dyn Drp);

impl ConflictResolver for DrpResolver<'_> {
    fn semantics(&self) -> Semantics {
        self.0.semantics()
    }

    fn resolve_pair(&self, left: &Operation, right: &Operation) -> Verdict {
        self.0.resolve_pair(left, right)
    }

    fn resolve_many(&self, ops: &[Operation]) -> Vec<usize> {
        self.0.resolve_many(ops)
    }
}
