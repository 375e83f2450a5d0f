//! Layer 5: Hash graph
//!
//! In-memory DAG of vertices keyed by content hash. Acyclic by
//! construction: a vertex can only be inserted after all of its
//! dependencies, and its hash commits to them.
//!
//! INVARIANT: exactly one root (empty deps); frontier = vertices with no
//! children; every tie-break is lexicographic hash order so all peers agree.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};

use crate::error::GraphError;
use crate::hash::Hash;
use crate::vertex::Vertex;

#[derive(Clone, Debug)]
pub struct HashGraph {
    vertices: BTreeMap<Hash, Vertex>,
    children: BTreeMap<Hash, BTreeSet<Hash>>,
    frontier: BTreeSet<Hash>,
    root_hash: Hash,
}

impl HashGraph {
    pub fn new() -> Self {
        let root = Vertex::root();
        let root_hash = root.hash();
        let mut vertices = BTreeMap::new();
        vertices.insert(root_hash, root);
        let mut children = BTreeMap::new();
        children.insert(root_hash, BTreeSet::new());
        let mut frontier = BTreeSet::new();
        frontier.insert(root_hash);
        Self {
            vertices,
            children,
            frontier,
            root_hash,
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.vertices.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Vertex> {
        self.vertices.get(hash)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn children_of(&self, hash: &Hash) -> Option<&BTreeSet<Hash>> {
        self.children.get(hash)
    }

    /// Current frontier, sorted by hash.
    pub fn get_frontier(&self) -> Vec<Hash> {
        self.frontier.iter().copied().collect()
    }

    /// Insert a vertex whose dependencies are all present.
    ///
    /// Every dependency gains a forward edge to the vertex and leaves the
    /// frontier; the vertex joins it.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), GraphError> {
        let hash = vertex.hash();
        if self.vertices.contains_key(&hash) {
            return Err(GraphError::DuplicateVertex { vertex: hash });
        }
        for dep in vertex.dependencies() {
            if !self.vertices.contains_key(dep) {
                return Err(GraphError::UnknownDependency {
                    vertex: hash,
                    dependency: *dep,
                });
            }
        }
        for dep in vertex.dependencies() {
            self.children.entry(*dep).or_default().insert(hash);
            self.frontier.remove(dep);
        }
        self.children.entry(hash).or_default();
        self.frontier.insert(hash);
        self.vertices.insert(hash, vertex);
        Ok(())
    }

    /// Every vertex reachable from `starts` by walking dependency edges,
    /// including `starts` themselves.
    pub fn ancestors_or_self(&self, starts: &[Hash]) -> Result<BTreeSet<Hash>, GraphError> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Hash> = VecDeque::new();
        for start in starts {
            if !self.vertices.contains_key(start) {
                return Err(GraphError::UnknownVertex { hash: *start });
            }
            if seen.insert(*start) {
                queue.push_back(*start);
            }
        }
        while let Some(hash) = queue.pop_front() {
            if let Some(vertex) = self.vertices.get(&hash) {
                for dep in vertex.dependencies() {
                    if seen.insert(*dep) {
                        queue.push_back(*dep);
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Lowest common ancestor of `heads`, by iterated pairwise LCA over the
    /// hash-sorted candidate set.
    ///
    /// `subgraph` receives every vertex that is an ancestor-or-self of some
    /// head and not an ancestor-or-self of the returned LCA: exactly the
    /// vertices whose operations are missing from the cached state at the
    /// LCA. For a single head the subgraph is empty (the cached state at a
    /// vertex already includes that vertex's own operation).
    pub fn lowest_common_ancestor(
        &self,
        heads: &[Hash],
        subgraph: &mut BTreeSet<Hash>,
    ) -> Result<Hash, GraphError> {
        if heads.is_empty() {
            return Err(GraphError::EmptyHeadSet);
        }
        let mut sorted: Vec<Hash> = heads.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for head in &sorted {
            if !self.vertices.contains_key(head) {
                return Err(GraphError::UnknownVertex { hash: *head });
            }
        }

        let mut lca = sorted[0];
        for head in &sorted[1..] {
            lca = self.pairwise_lca(lca, *head)?;
        }

        let head_ancestors = self.ancestors_or_self(&sorted)?;
        let lca_ancestors = self.ancestors_or_self(&[lca])?;
        subgraph.extend(head_ancestors.difference(&lca_ancestors).copied());
        Ok(lca)
    }

    fn pairwise_lca(&self, a: Hash, b: Hash) -> Result<Hash, GraphError> {
        if a == b {
            return Ok(a);
        }
        let ancestors_a = self.ancestors_or_self(&[a])?;
        let ancestors_b = self.ancestors_or_self(&[b])?;
        let common: BTreeSet<Hash> = ancestors_a.intersection(&ancestors_b).copied().collect();

        // Strict ancestors of common members cannot be lowest.
        let mut above = BTreeSet::new();
        let mut queue: VecDeque<Hash> = VecDeque::new();
        for member in &common {
            if let Some(vertex) = self.vertices.get(member) {
                for dep in vertex.dependencies() {
                    if above.insert(*dep) {
                        queue.push_back(*dep);
                    }
                }
            }
        }
        while let Some(hash) = queue.pop_front() {
            if let Some(vertex) = self.vertices.get(&hash) {
                for dep in vertex.dependencies() {
                    if above.insert(*dep) {
                        queue.push_back(*dep);
                    }
                }
            }
        }

        common
            .iter()
            .find(|member| !above.contains(member))
            .copied()
            .ok_or(GraphError::EmptyHeadSet)
    }

    /// Whole-graph topological order, ties broken by hash.
    pub fn topological_sort(&self) -> Vec<Hash> {
        let mut indegree: BTreeMap<Hash, usize> = BTreeMap::new();
        for vertex in self.vertices.values() {
            indegree.insert(vertex.hash(), vertex.dependencies().len());
        }
        let mut ready: BinaryHeap<Reverse<Hash>> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(hash, _)| Reverse(*hash))
            .collect();

        let mut order = Vec::with_capacity(self.vertices.len());
        while let Some(Reverse(hash)) = ready.pop() {
            order.push(hash);
            if let Some(children) = self.children.get(&hash) {
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
        order
    }
}

impl Default for HashGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerId;
    use crate::operation::{DrpKind, Operation};
    use crate::time::Timestamp;
    use serde_json::json;

    fn vertex(peer: &str, tag: u64, deps: Vec<Hash>) -> Vertex {
        Vertex::new(
            PeerId::new_unchecked(peer),
            Some(Operation::new(DrpKind::Drp, "op", vec![json!(tag)])),
            deps,
            Timestamp::from_millis(tag),
        )
        .unwrap()
    }

    #[test]
    fn new_graph_has_root_frontier() {
        let graph = HashGraph::new();
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.get_frontier(), vec![graph.root_hash()]);
    }

    #[test]
    fn add_vertex_advances_frontier() {
        let mut graph = HashGraph::new();
        let a = vertex("p1", 1, vec![graph.root_hash()]);
        let a_hash = a.hash();
        graph.add_vertex(a).unwrap();
        assert_eq!(graph.get_frontier(), vec![a_hash]);

        let b = vertex("p2", 2, vec![graph.root_hash()]);
        let b_hash = b.hash();
        graph.add_vertex(b).unwrap();
        let mut expected = vec![a_hash, b_hash];
        expected.sort_unstable();
        assert_eq!(graph.get_frontier(), expected);
    }

    #[test]
    fn rejects_duplicates_and_unknown_deps() {
        let mut graph = HashGraph::new();
        let a = vertex("p1", 1, vec![graph.root_hash()]);
        graph.add_vertex(a.clone()).unwrap();
        assert!(matches!(
            graph.add_vertex(a.clone()),
            Err(GraphError::DuplicateVertex { .. })
        ));

        let phantom = vertex("p1", 9, vec![graph.root_hash()]);
        let orphan = vertex("p2", 10, vec![phantom.hash()]);
        assert!(matches!(
            graph.add_vertex(orphan),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn lca_of_single_head_is_itself_with_empty_subgraph() {
        let mut graph = HashGraph::new();
        let a = vertex("p1", 1, vec![graph.root_hash()]);
        let a_hash = a.hash();
        graph.add_vertex(a).unwrap();

        let mut subgraph = BTreeSet::new();
        let lca = graph.lowest_common_ancestor(&[a_hash], &mut subgraph).unwrap();
        assert_eq!(lca, a_hash);
        assert!(subgraph.is_empty());
    }

    #[test]
    fn lca_of_two_branches_is_fork_point() {
        let mut graph = HashGraph::new();
        let base = vertex("p1", 1, vec![graph.root_hash()]);
        let base_hash = base.hash();
        graph.add_vertex(base).unwrap();

        let left = vertex("p1", 2, vec![base_hash]);
        let right = vertex("p2", 3, vec![base_hash]);
        let (left_hash, right_hash) = (left.hash(), right.hash());
        graph.add_vertex(left).unwrap();
        graph.add_vertex(right).unwrap();

        let mut subgraph = BTreeSet::new();
        let lca = graph
            .lowest_common_ancestor(&[left_hash, right_hash], &mut subgraph)
            .unwrap();
        assert_eq!(lca, base_hash);
        assert_eq!(subgraph, BTreeSet::from([left_hash, right_hash]));
    }

    #[test]
    fn lca_subgraph_covers_interior_vertices() {
        // root -> base -> l1 -> l2, base -> r1; heads {l2, r1}.
        let mut graph = HashGraph::new();
        let base = vertex("p1", 1, vec![graph.root_hash()]);
        let base_hash = base.hash();
        graph.add_vertex(base).unwrap();
        let l1 = vertex("p1", 2, vec![base_hash]);
        let l1_hash = l1.hash();
        graph.add_vertex(l1).unwrap();
        let l2 = vertex("p1", 3, vec![l1_hash]);
        let l2_hash = l2.hash();
        graph.add_vertex(l2).unwrap();
        let r1 = vertex("p2", 4, vec![base_hash]);
        let r1_hash = r1.hash();
        graph.add_vertex(r1).unwrap();

        let mut subgraph = BTreeSet::new();
        let lca = graph
            .lowest_common_ancestor(&[l2_hash, r1_hash], &mut subgraph)
            .unwrap();
        assert_eq!(lca, base_hash);
        assert_eq!(subgraph, BTreeSet::from([l1_hash, l2_hash, r1_hash]));
    }

    #[test]
    fn lca_of_three_heads_reaches_root() {
        let mut graph = HashGraph::new();
        let mut heads = Vec::new();
        for (peer, tag) in [("p1", 1), ("p2", 2), ("p3", 3)] {
            let v = vertex(peer, tag, vec![graph.root_hash()]);
            heads.push(v.hash());
            graph.add_vertex(v).unwrap();
        }
        let mut subgraph = BTreeSet::new();
        let lca = graph.lowest_common_ancestor(&heads, &mut subgraph).unwrap();
        assert_eq!(lca, graph.root_hash());
        assert_eq!(subgraph.len(), 3);
    }

    #[test]
    fn topological_sort_respects_causality() {
        let mut graph = HashGraph::new();
        let a = vertex("p1", 1, vec![graph.root_hash()]);
        let a_hash = a.hash();
        graph.add_vertex(a).unwrap();
        let b = vertex("p2", 2, vec![a_hash]);
        let b_hash = b.hash();
        graph.add_vertex(b).unwrap();

        let order = graph.topological_sort();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], graph.root_hash());
        let pos = |h: Hash| order.iter().position(|x| *x == h).unwrap();
        assert!(pos(a_hash) < pos(b_hash));
    }
}
