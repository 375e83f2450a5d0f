//! The replicated-object engine.
//!
//! Owns the hash graph, the two per-vertex state caches (DRP and ACL), the
//! original snapshots reconstruction starts from, and the finality store.
//! Local calls enter through `call`; remote vertices through `merge`. Both
//! tracks run over the same graph through one generic reconstruction path.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use serde_json::{Value, json};

use drp_core::{
    DrpKind, Hash, HashGraph, ObjectId, Operation, PeerId, QUERY_PREFIX, Timestamp, Vertex,
    linearize,
};

use crate::acl::Acl;
use crate::drp::{Drp, DrpError, DrpResolver, DrpState};
use crate::error::{EngineError, ValidationError};
use crate::finality::{DEFAULT_FINALITY_THRESHOLD, FinalityStore};

/// Where a subscriber notification came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    CallFn,
    Merge,
}

pub type Subscriber = Box<dyn FnMut(&DrpObject, Origin, &[Vertex])>;

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub finality_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            finality_threshold: DEFAULT_FINALITY_THRESHOLD,
        }
    }
}

/// Construction options. Exactly one of `public_credential` / `acl` must be
/// supplied; everything else is optional.
pub struct DrpObjectOptions {
    pub peer_id: PeerId,
    pub public_credential: Option<String>,
    pub acl: Option<Box<dyn Drp>>,
    pub drp: Option<Box<dyn Drp>>,
    pub id: Option<ObjectId>,
    pub config: Option<EngineConfig>,
}

impl DrpObjectOptions {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            public_credential: None,
            acl: None,
            drp: None,
            id: None,
            config: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.public_credential = Some(credential.into());
        self
    }

    pub fn with_acl(mut self, acl: Box<dyn Drp>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_drp(mut self, drp: Box<dyn Drp>) -> Self {
        self.drp = Some(drp);
        self
    }

    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }
}

pub struct DrpObject {
    id: ObjectId,
    peer_id: PeerId,
    graph: HashGraph,
    drp: Option<Box<dyn Drp>>,
    acl: Box<dyn Drp>,
    original_drp: Option<Box<dyn Drp>>,
    original_acl: Box<dyn Drp>,
    drp_states: BTreeMap<Hash, DrpState>,
    acl_states: BTreeMap<Hash, DrpState>,
    finality: FinalityStore,
    subscribers: Vec<Subscriber>,
}

impl DrpObject {
    pub fn new(options: DrpObjectOptions) -> Result<Self, EngineError> {
        let DrpObjectOptions {
            peer_id,
            public_credential,
            acl,
            drp,
            id,
            config,
        } = options;

        let acl: Box<dyn Drp> = match (acl, public_credential) {
            (Some(acl), None) => acl,
            (None, Some(credential)) => {
                Box::new(Acl::permissionless(peer_id.as_str(), credential))
            }
            (Some(_), Some(_)) => {
                return Err(EngineError::Construction(
                    "supply either an acl or a public credential, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(EngineError::Construction(
                    "either an acl or a public credential is required".to_string(),
                ));
            }
        };

        let graph = HashGraph::new();
        let root = graph.root_hash();
        let mut drp_states = BTreeMap::new();
        drp_states.insert(root, DrpState::new());
        let mut acl_states = BTreeMap::new();
        acl_states.insert(root, DrpState::new());

        let config = config.unwrap_or_default();
        let id = id.unwrap_or_else(|| ObjectId::generate(&peer_id));

        let mut object = Self {
            id,
            peer_id,
            graph,
            original_drp: drp.as_ref().map(|d| d.clone_box()),
            drp,
            original_acl: acl.clone_box(),
            acl,
            drp_states,
            acl_states,
            finality: FinalityStore::new(config.finality_threshold),
            subscribers: Vec::new(),
        };

        let signers = object.signers_at_hash(&root)?;
        object.finality.init(root, signers);
        Ok(object)
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn graph(&self) -> &HashGraph {
        &self.graph
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.graph.vertices()
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.vertex_count()
    }

    pub fn frontier(&self) -> Vec<Hash> {
        self.graph.get_frontier()
    }

    pub fn drp(&self) -> Option<&dyn Drp> {
        self.drp.as_deref()
    }

    pub fn acl(&self) -> &dyn Drp {
        self.acl.as_ref()
    }

    pub fn drp_state_at(&self, hash: &Hash) -> Option<&DrpState> {
        self.drp_states.get(hash)
    }

    pub fn acl_state_at(&self, hash: &Hash) -> Option<&DrpState> {
        self.acl_states.get(hash)
    }

    pub fn finality(&self) -> &FinalityStore {
        &self.finality
    }

    pub fn finality_mut(&mut self) -> &mut FinalityStore {
        &mut self.finality
    }

    pub fn subscribe(&mut self, callback: Subscriber) {
        self.subscribers.push(callback);
    }

    /// The interception boundary. `query_*` paths are pure pass-throughs to
    /// the live instance; everything else goes down the local-apply
    /// pipeline. Re-entrant calls cannot arise: a `Drp` implementation
    /// never holds a handle back to the engine, so dispatch is the only
    /// way in.
    pub fn call(
        &mut self,
        op_type: &str,
        args: &[Value],
        kind: DrpKind,
    ) -> Result<Value, EngineError> {
        if op_type.starts_with(QUERY_PREFIX) {
            let target: &dyn Drp = match kind {
                DrpKind::Drp => self.require_drp()?,
                DrpKind::Acl => self.acl.as_ref(),
            };
            return target.query(op_type, args).map_err(EngineError::from);
        }
        self.apply_local(op_type, args, kind)
    }

    /// Local application: speculative apply at the current frontier, vertex
    /// creation only when state actually changed.
    pub fn apply_local(
        &mut self,
        op_type: &str,
        args: &[Value],
        kind: DrpKind,
    ) -> Result<Value, EngineError> {
        let deps = self.graph.get_frontier();
        let mut candidate = self.compute_track(kind, &deps, None)?;
        let before = candidate.state();

        let result = match candidate.apply(op_type, args) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(op = %op_type, error = %err, "operation rejected; no vertex created");
                return Err(EngineError::Operation(err));
            }
        };

        let after = candidate.state();
        if after == before {
            return Ok(result);
        }

        let timestamp = Timestamp::now();
        let operation = Operation::new(kind, op_type, args.to_vec());
        let vertex = Vertex::new(self.peer_id.clone(), Some(operation), deps.clone(), timestamp)?;
        let hash = vertex.hash();

        let other = if self.track_available(kind.opposite()) {
            Some(self.compute_track(kind.opposite(), &deps, None)?.state())
        } else {
            None
        };

        self.graph.add_vertex(vertex.clone())?;
        self.states_mut(kind).insert(hash, after.clone());
        if let Some(other) = other {
            self.states_mut(kind.opposite()).insert(hash, other);
        }

        let signers = self.signers_at_hash(&hash)?;
        self.finality.init(hash, signers);

        self.notify(Origin::CallFn, std::slice::from_ref(&vertex));

        match kind {
            DrpKind::Drp => {
                if let Some(drp) = self.drp.as_deref_mut() {
                    drp.set_state(&after);
                }
            }
            DrpKind::Acl => self.acl.set_state(&after),
        }

        Ok(result)
    }

    /// Merge a batch of remote vertices. Recoverable per-vertex failures
    /// land in the returned `missing` set; only internal state faults
    /// propagate.
    pub fn merge(&mut self, vertices: &[Vertex]) -> Result<(bool, BTreeSet<Hash>), EngineError> {
        let mut missing = BTreeSet::new();
        let mut admitted = Vec::new();

        for vertex in vertices {
            if self.graph.contains(&vertex.hash()) {
                continue;
            }
            if vertex.operation().is_none() {
                continue;
            }
            match self.admit(vertex) {
                Ok(()) => admitted.push(vertex.clone()),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(vertex = %vertex.hash(), error = %err, "vertex rejected during merge");
                    missing.insert(vertex.hash());
                }
            }
        }

        if !admitted.is_empty() {
            self.refresh_live()?;
            self.notify(Origin::Merge, &admitted);
        }
        Ok((missing.is_empty(), missing))
    }

    fn admit(&mut self, vertex: &Vertex) -> Result<(), EngineError> {
        self.validate_vertex(vertex)?;
        let deps = vertex.dependencies().to_vec();
        let hash = vertex.hash();
        let operation = vertex.operation();

        if self.original_drp.is_some() {
            let kind = operation.map(|op| op.drp_type).unwrap_or(DrpKind::Drp);
            let same = self.compute_track(kind, &deps, operation)?.state();
            let other = self.compute_track(kind.opposite(), &deps, None)?.state();
            self.graph.add_vertex(vertex.clone())?;
            self.states_mut(kind).insert(hash, same);
            self.states_mut(kind.opposite()).insert(hash, other);
        } else {
            // ACL-only mode: no DRP track, but writer checks and finality
            // still need the ACL at arbitrary dependency sets.
            let acl_override = operation.filter(|op| op.drp_type == DrpKind::Acl);
            let acl_state = self
                .compute_track(DrpKind::Acl, &deps, acl_override)?
                .state();
            self.graph.add_vertex(vertex.clone())?;
            self.acl_states.insert(hash, acl_state);
        }

        let signers = self.signers_at_hash(&hash)?;
        self.finality.init(hash, signers);
        Ok(())
    }

    /// All admission rules. Public so embedders can pre-screen batches.
    pub fn validate_vertex(&self, vertex: &Vertex) -> Result<(), EngineError> {
        let hash = vertex.hash();
        if vertex.operation().is_none() {
            return Err(ValidationError::MissingOperation { vertex: hash }.into());
        }

        let recomputed = Vertex::compute_hash(
            vertex.peer_id(),
            vertex.operation(),
            vertex.dependencies(),
            vertex.timestamp(),
        )?;
        if recomputed != hash {
            return Err(ValidationError::HashMismatch {
                vertex: hash,
                recomputed,
            }
            .into());
        }

        if vertex.dependencies().is_empty() {
            return Err(ValidationError::MissingDependencies { vertex: hash }.into());
        }
        for dep in vertex.dependencies() {
            let dep_vertex =
                self.graph
                    .get(dep)
                    .ok_or_else(|| ValidationError::UnknownDependency {
                        vertex: hash,
                        dependency: *dep,
                    })?;
            if dep_vertex.timestamp() > vertex.timestamp() {
                return Err(ValidationError::TimestampOrder {
                    vertex: hash,
                    dependency: *dep,
                }
                .into());
            }
        }

        let now = Timestamp::now();
        if vertex.timestamp() > now {
            return Err(ValidationError::FutureTimestamp {
                vertex: hash,
                timestamp: vertex.timestamp(),
                now,
            }
            .into());
        }

        if !self.writer_allowed(vertex.dependencies(), vertex.peer_id())? {
            return Err(ValidationError::PermissionDenied {
                vertex: hash,
                peer: vertex.peer_id().clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Reconstruct one track at a dependency cut: original snapshot, cached
    /// state at the LCA assigned on top, linearized subgraph operations
    /// replayed, optional final override. Pure with respect to the engine.
    fn compute_track(
        &self,
        kind: DrpKind,
        deps: &[Hash],
        op_override: Option<&Operation>,
    ) -> Result<Box<dyn Drp>, EngineError> {
        let mut subgraph = BTreeSet::new();
        let lca = self.graph.lowest_common_ancestor(deps, &mut subgraph)?;

        let original: &dyn Drp = match kind {
            DrpKind::Drp => self.original_drp.as_deref().ok_or_else(|| {
                EngineError::Operation(DrpError::Rejected {
                    reason: "no DRP registered".to_string(),
                })
            })?,
            DrpKind::Acl => self.original_acl.as_ref(),
        };
        let mut object = original.clone_box();

        let cached = self
            .states(kind)
            .get(&lca)
            .ok_or(EngineError::State { kind, hash: lca })?;
        object.set_state(cached);

        let ops = linearize(&self.graph, &subgraph, &DrpResolver(object.as_ref()))?;
        for op in ops.iter().filter(|op| op.drp_type == kind) {
            if let Err(err) = object.apply(&op.op_type, &op.value) {
                // Deterministic on every peer: the same replay fails the same way.
                tracing::debug!(op = %op.op_type, error = %err, "replayed operation was a no-op");
            }
        }
        if let Some(op) = op_override.filter(|op| op.drp_type == kind) {
            if let Err(err) = object.apply(&op.op_type, &op.value) {
                tracing::debug!(op = %op.op_type, error = %err, "override operation was a no-op");
            }
        }
        Ok(object)
    }

    fn refresh_live(&mut self) -> Result<(), EngineError> {
        let frontier = self.graph.get_frontier();
        if self.original_drp.is_some() {
            let state = self.compute_track(DrpKind::Drp, &frontier, None)?.state();
            if let Some(drp) = self.drp.as_deref_mut() {
                drp.set_state(&state);
            }
        }
        let acl_state = self.compute_track(DrpKind::Acl, &frontier, None)?.state();
        self.acl.set_state(&acl_state);
        Ok(())
    }

    fn writer_allowed(&self, deps: &[Hash], peer: &PeerId) -> Result<bool, EngineError> {
        let acl = self.compute_track(DrpKind::Acl, deps, None)?;
        let value = acl
            .query("query_is_writer", &[json!(peer.as_str())])
            .map_err(EngineError::from)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn signers_at_hash(&self, hash: &Hash) -> Result<BTreeSet<String>, EngineError> {
        let state = self.acl_states.get(hash).ok_or(EngineError::State {
            kind: DrpKind::Acl,
            hash: *hash,
        })?;
        let mut acl = self.original_acl.clone_box();
        acl.set_state(state);
        let value = acl
            .query("query_get_finality_signers", &[])
            .map_err(EngineError::from)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    fn track_available(&self, kind: DrpKind) -> bool {
        match kind {
            DrpKind::Drp => self.original_drp.is_some(),
            DrpKind::Acl => true,
        }
    }

    fn states(&self, kind: DrpKind) -> &BTreeMap<Hash, DrpState> {
        match kind {
            DrpKind::Drp => &self.drp_states,
            DrpKind::Acl => &self.acl_states,
        }
    }

    fn states_mut(&mut self, kind: DrpKind) -> &mut BTreeMap<Hash, DrpState> {
        match kind {
            DrpKind::Drp => &mut self.drp_states,
            DrpKind::Acl => &mut self.acl_states,
        }
    }

    fn require_drp(&self) -> Result<&dyn Drp, EngineError> {
        self.drp.as_deref().ok_or_else(|| {
            EngineError::Operation(DrpError::Rejected {
                reason: "no DRP registered".to_string(),
            })
        })
    }

    fn notify(&mut self, origin: Origin, vertices: &[Vertex]) {
        let mut subscribers = mem::take(&mut self.subscribers);
        for callback in subscribers.iter_mut() {
            callback(&*self, origin, vertices);
        }
        // Keep subscriptions registered from inside a callback.
        let added = mem::take(&mut self.subscribers);
        self.subscribers = subscribers;
        self.subscribers.extend(added);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drp_core::Semantics;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Counter {
        value: i64,
    }

    impl Drp for Counter {
        fn semantics(&self) -> Semantics {
            Semantics::Multiple
        }

        fn apply(&mut self, op_type: &str, args: &[Value]) -> Result<Value, DrpError> {
            match op_type {
                "increment" => {
                    let amount = args.first().and_then(Value::as_i64).ok_or_else(|| {
                        DrpError::BadArguments {
                            op_type: op_type.to_string(),
                            reason: "expected an integer".to_string(),
                        }
                    })?;
                    self.value += amount;
                    Ok(json!(self.value))
                }
                other => Err(DrpError::UnknownOperation {
                    op_type: other.to_string(),
                }),
            }
        }

        fn query(&self, op_type: &str, _args: &[Value]) -> Result<Value, DrpError> {
            match op_type {
                "query_read" => Ok(json!(self.value)),
                other => Err(DrpError::UnknownOperation {
                    op_type: other.to_string(),
                }),
            }
        }

        fn state(&self) -> DrpState {
            let mut state = DrpState::new();
            state.insert("value", json!(self.value));
            state
        }

        fn set_state(&mut self, state: &DrpState) {
            if let Some(value) = state.get("value").and_then(Value::as_i64) {
                self.value = value;
            }
        }

        fn clone_box(&self) -> Box<dyn Drp> {
            Box::new(self.clone())
        }
    }

    fn counter_object(peer: &str) -> DrpObject {
        DrpObject::new(
            DrpObjectOptions::new(PeerId::new_unchecked(peer))
                .with_credential(format!("cred-{peer}"))
                .with_drp(Box::new(Counter::default())),
        )
        .unwrap()
    }

    #[test]
    fn construction_requires_exactly_one_of_credential_or_acl() {
        let bare = DrpObject::new(DrpObjectOptions::new(PeerId::new_unchecked("p1")));
        assert!(matches!(bare, Err(EngineError::Construction(_))));

        let both = DrpObject::new(
            DrpObjectOptions::new(PeerId::new_unchecked("p1"))
                .with_credential("cred")
                .with_acl(Box::new(Acl::permissionless("p1", "cred"))),
        );
        assert!(matches!(both, Err(EngineError::Construction(_))));

        assert!(
            DrpObject::new(DrpObjectOptions::new(PeerId::new_unchecked("p1")).with_credential("cred"))
                .is_ok()
        );
    }

    #[test]
    fn construction_seeds_root_state_and_finality() {
        let object = counter_object("p1");
        let root = object.graph().root_hash();
        assert!(object.drp_state_at(&root).is_some());
        assert!(object.acl_state_at(&root).is_some());
        assert_eq!(
            object.finality().signers(&root),
            Some(&BTreeSet::from(["p1".to_string()]))
        );
    }

    #[test]
    fn provided_id_is_used_verbatim() {
        let id = ObjectId::from_raw("custom-id").unwrap();
        let object = DrpObject::new(
            DrpObjectOptions::new(PeerId::new_unchecked("p1"))
                .with_credential("cred")
                .with_id(id.clone()),
        )
        .unwrap();
        assert_eq!(object.id(), &id);
    }

    #[test]
    fn mutating_call_creates_a_vertex_and_updates_the_live_drp() {
        let mut object = counter_object("p1");
        let result = object.call("increment", &[json!(5)], DrpKind::Drp).unwrap();
        assert_eq!(result, json!(5));
        assert_eq!(object.vertex_count(), 2);
        assert_eq!(
            object.call("query_read", &[], DrpKind::Drp).unwrap(),
            json!(5)
        );
    }

    #[test]
    fn unchanged_state_creates_no_vertex() {
        let mut object = counter_object("p1");
        let result = object.call("increment", &[json!(0)], DrpKind::Drp).unwrap();
        assert_eq!(result, json!(0));
        assert_eq!(object.vertex_count(), 1);
        assert_eq!(object.frontier(), vec![object.graph().root_hash()]);
    }

    #[test]
    fn failed_operation_creates_no_vertex() {
        let mut object = counter_object("p1");
        let err = object.call("decrement", &[json!(1)], DrpKind::Drp).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Operation(DrpError::UnknownOperation { .. })
        ));
        assert_eq!(object.vertex_count(), 1);
    }

    #[test]
    fn subscribers_see_call_fn_events_in_order() {
        let mut object = counter_object("p1");
        let seen: Rc<RefCell<Vec<(Origin, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        object.subscribe(Box::new(move |_, origin, vertices| {
            sink.borrow_mut().push((origin, vertices.len()));
        }));

        object.call("increment", &[json!(1)], DrpKind::Drp).unwrap();
        object.call("increment", &[json!(2)], DrpKind::Drp).unwrap();

        assert_eq!(
            seen.borrow().as_slice(),
            &[(Origin::CallFn, 1), (Origin::CallFn, 1)]
        );
    }

    #[test]
    fn acl_operations_flow_through_the_acl_track() {
        let mut object = counter_object("p1");
        object
            .call("grant", &[json!("p2")], DrpKind::Acl)
            .unwrap();
        assert_eq!(object.vertex_count(), 2);
        assert_eq!(
            object
                .call("query_is_writer", &[json!("p2")], DrpKind::Acl)
                .unwrap(),
            json!(true)
        );

        // The DRP cache was carried forward at the ACL vertex.
        let head = object.frontier()[0];
        assert!(object.drp_state_at(&head).is_some());
        assert!(object.acl_state_at(&head).is_some());
    }
}
