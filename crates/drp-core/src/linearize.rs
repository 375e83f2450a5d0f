//! Layer 6: Deterministic linearization
//!
//! Orders the operations implied by a causal cut. Causal edges are always
//! respected; concurrent vertices form windows that the conflict resolver
//! settles. Identical vertex sets linearize identically on every peer.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::error::GraphError;
use crate::graph::HashGraph;
use crate::hash::Hash;
use crate::operation::Operation;

/// How a DRP resolves concurrent operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Semantics {
    /// The resolver judges each unordered pair of concurrent operations.
    Pairwise,
    /// The resolver judges the whole concurrent set at once.
    Multiple,
}

/// Pairwise resolver output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    NoConflict,
    DropLeft,
    DropRight,
}

/// Conflict policy of a replicated object.
///
/// Implementations must be pure functions of the operations handed to
/// them; anything else breaks cross-peer determinism.
pub trait ConflictResolver {
    fn semantics(&self) -> Semantics;

    fn resolve_pair(&self, _left: &Operation, _right: &Operation) -> Verdict {
        Verdict::NoConflict
    }

    /// Emission order for a whole concurrent window, as indices into `ops`.
    /// Omitted indices are dropped.
    fn resolve_many(&self, ops: &[Operation]) -> Vec<usize> {
        (0..ops.len()).collect()
    }
}

/// Linearize the operations of `subgraph`.
///
/// Kahn's algorithm restricted to the subgraph, ready set kept in a
/// min-heap keyed by hash. Each round's ready set is mutually concurrent:
/// an edge between two ready vertices would contradict readiness, and the
/// subgraph is closed under in-between vertices, so no causal path can
/// sneak around it.
pub fn linearize(
    graph: &HashGraph,
    subgraph: &BTreeSet<Hash>,
    resolver: &dyn ConflictResolver,
) -> Result<Vec<Operation>, GraphError> {
    let mut indegree: BTreeMap<Hash, usize> = BTreeMap::new();
    for hash in subgraph {
        let vertex = graph
            .get(hash)
            .ok_or(GraphError::UnknownVertex { hash: *hash })?;
        let degree = vertex
            .dependencies()
            .iter()
            .filter(|dep| subgraph.contains(dep))
            .count();
        indegree.insert(*hash, degree);
    }

    let mut ready: BinaryHeap<Reverse<Hash>> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(hash, _)| Reverse(*hash))
        .collect();

    let mut emitted = Vec::with_capacity(subgraph.len());
    let mut processed = 0;

    while !ready.is_empty() {
        // Drain the whole ready set: one concurrency window, hash-sorted.
        let mut window = Vec::new();
        while let Some(Reverse(hash)) = ready.pop() {
            window.push(hash);
        }
        processed += window.len();

        if window.len() == 1 {
            push_operation(&mut emitted, graph, window[0]);
        } else {
            match resolver.semantics() {
                Semantics::Pairwise => resolve_pairwise(&mut emitted, graph, &window, resolver),
                Semantics::Multiple => resolve_multiple(&mut emitted, graph, &window, resolver),
            }
        }

        // Dropped vertices still satisfy causality for their children.
        for hash in &window {
            if let Some(children) = graph.children_of(hash) {
                for child in children {
                    if let Some(degree) = indegree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(Reverse(*child));
                        }
                    }
                }
            }
        }
    }

    if processed != subgraph.len() {
        // Unreachable for a well-formed subgraph (closed and acyclic), but
        // surface the stuck vertex rather than silently dropping operations.
        if let Some(hash) = indegree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(hash, _)| *hash)
        {
            return Err(GraphError::UnknownVertex { hash });
        }
    }

    Ok(emitted)
}

fn resolve_pairwise(
    emitted: &mut Vec<Operation>,
    graph: &HashGraph,
    window: &[Hash],
    resolver: &dyn ConflictResolver,
) {
    let ops: Vec<Option<&Operation>> = window
        .iter()
        .map(|hash| graph.get(hash).and_then(|v| v.operation()))
        .collect();
    let mut dropped = vec![false; window.len()];

    for left in 0..window.len() {
        if dropped[left] {
            continue;
        }
        for right in (left + 1)..window.len() {
            if dropped[left] || dropped[right] {
                continue;
            }
            let (Some(left_op), Some(right_op)) = (ops[left], ops[right]) else {
                continue;
            };
            match resolver.resolve_pair(left_op, right_op) {
                Verdict::NoConflict => {}
                Verdict::DropLeft => dropped[left] = true,
                Verdict::DropRight => dropped[right] = true,
            }
        }
    }

    for (index, hash) in window.iter().enumerate() {
        if !dropped[index] {
            push_operation(emitted, graph, *hash);
        }
    }
}

fn resolve_multiple(
    emitted: &mut Vec<Operation>,
    graph: &HashGraph,
    window: &[Hash],
    resolver: &dyn ConflictResolver,
) {
    let with_ops: Vec<(Hash, Operation)> = window
        .iter()
        .filter_map(|hash| {
            graph
                .get(hash)
                .and_then(|v| v.operation())
                .map(|op| (*hash, op.clone()))
        })
        .collect();
    let ops: Vec<Operation> = with_ops.iter().map(|(_, op)| op.clone()).collect();
    for index in resolver.resolve_many(&ops) {
        if let Some((_, op)) = with_ops.get(index) {
            emitted.push(op.clone());
        }
    }
}

fn push_operation(emitted: &mut Vec<Operation>, graph: &HashGraph, hash: Hash) {
    if let Some(op) = graph.get(&hash).and_then(|v| v.operation()) {
        emitted.push(op.clone());
    }
}
