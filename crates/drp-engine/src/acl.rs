//! Access-control list: the engine's built-in DRP over the ACL track.
//!
//! Admins are fixed at creation (peer id mapped to an opaque public
//! credential) and double as the finality-signer set. Writers are granted
//! and revoked through ACL-kind operations; a permissionless ACL admits
//! every peer as a writer.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use drp_core::{DrpKind, Operation, Semantics, Verdict};

use crate::drp::{Drp, DrpError, DrpState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acl {
    admins: BTreeMap<String, String>,
    writers: BTreeSet<String>,
    permissionless: bool,
}

impl Acl {
    pub fn new(admins: BTreeMap<String, String>, permissionless: bool) -> Self {
        Self {
            admins,
            writers: BTreeSet::new(),
            permissionless,
        }
    }

    /// The default ACL: permissionless, creator credential as sole admin.
    pub fn permissionless(admin_peer: impl Into<String>, credential: impl Into<String>) -> Self {
        let mut admins = BTreeMap::new();
        admins.insert(admin_peer.into(), credential.into());
        Self::new(admins, true)
    }

    pub fn is_admin(&self, peer: &str) -> bool {
        self.admins.contains_key(peer)
    }

    pub fn is_writer(&self, peer: &str) -> bool {
        self.permissionless || self.admins.contains_key(peer) || self.writers.contains(peer)
    }

    pub fn finality_signers(&self) -> BTreeSet<String> {
        self.admins.keys().cloned().collect()
    }

    fn peer_arg(op_type: &str, args: &[Value]) -> Result<String, DrpError> {
        args.first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DrpError::BadArguments {
                op_type: op_type.to_string(),
                reason: "expected a peer id string".to_string(),
            })
    }

    fn grant(&mut self, peer: String) {
        if !self.admins.contains_key(&peer) {
            self.writers.insert(peer);
        }
    }

    fn revoke(&mut self, peer: &str) -> Result<(), DrpError> {
        if self.admins.contains_key(peer) {
            return Err(DrpError::Rejected {
                reason: format!("cannot revoke admin `{peer}`"),
            });
        }
        self.writers.remove(peer);
        Ok(())
    }
}

impl Drp for Acl {
    fn semantics(&self) -> Semantics {
        Semantics::Pairwise
    }

    fn resolve_pair(&self, left: &Operation, right: &Operation) -> Verdict {
        // Concurrent grant/revoke of the same peer: revoke wins.
        if left.drp_type != DrpKind::Acl || right.drp_type != DrpKind::Acl {
            return Verdict::NoConflict;
        }
        let target = |op: &Operation| op.value.first().and_then(Value::as_str).map(str::to_string);
        if target(left) != target(right) {
            return Verdict::NoConflict;
        }
        match (left.op_type.as_str(), right.op_type.as_str()) {
            ("grant", "revoke") => Verdict::DropLeft,
            ("revoke", "grant") => Verdict::DropRight,
            _ => Verdict::NoConflict,
        }
    }

    fn apply(&mut self, op_type: &str, args: &[Value]) -> Result<Value, DrpError> {
        match op_type {
            "grant" => {
                self.grant(Self::peer_arg(op_type, args)?);
                Ok(Value::Null)
            }
            "revoke" => {
                self.revoke(&Self::peer_arg(op_type, args)?)?;
                Ok(Value::Null)
            }
            "set_permissionless" => {
                let flag = args.first().and_then(Value::as_bool).ok_or_else(|| {
                    DrpError::BadArguments {
                        op_type: op_type.to_string(),
                        reason: "expected a bool".to_string(),
                    }
                })?;
                self.permissionless = flag;
                Ok(Value::Null)
            }
            other => Err(DrpError::UnknownOperation {
                op_type: other.to_string(),
            }),
        }
    }

    fn query(&self, op_type: &str, args: &[Value]) -> Result<Value, DrpError> {
        match op_type {
            "query_is_writer" => Ok(json!(self.is_writer(&Self::peer_arg(op_type, args)?))),
            "query_is_admin" => Ok(json!(self.is_admin(&Self::peer_arg(op_type, args)?))),
            "query_get_finality_signers" => Ok(json!(self.finality_signers())),
            other => Err(DrpError::UnknownOperation {
                op_type: other.to_string(),
            }),
        }
    }

    fn state(&self) -> DrpState {
        let mut state = DrpState::new();
        state.insert("admins", json!(self.admins));
        state.insert("writers", json!(self.writers));
        state.insert("permissionless", json!(self.permissionless));
        state
    }

    fn set_state(&mut self, state: &DrpState) {
        if let Some(value) = state.get("admins") {
            if let Ok(admins) = serde_json::from_value(value.clone()) {
                self.admins = admins;
            }
        }
        if let Some(value) = state.get("writers") {
            if let Ok(writers) = serde_json::from_value(value.clone()) {
                self.writers = writers;
            }
        }
        if let Some(value) = state.get("permissionless") {
            if let Some(flag) = value.as_bool() {
                self.permissionless = flag;
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Drp> {
        Box::new(self.clone())
    }
}
