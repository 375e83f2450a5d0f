//! Shared test DRPs: a grow-only counter and a last-writer-wins register.

use serde_json::{Value, json};

use drp_core::{DrpKind, Operation, PeerId, Semantics, Verdict, Vertex};
use drp_engine::{Drp, DrpError, DrpObject, DrpState};

#[derive(Clone, Default)]
pub struct Counter {
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

/// Register with `write(value, at)` operations; concurrent writes resolve
/// pairwise, higher `at` wins, ties broken by value so every peer agrees.
#[derive(Clone, Default)]
pub struct LwwRegister {
    value: Option<String>,
    at: u64,
}

impl LwwRegister {
    fn write_stamp(op: &Operation) -> u64 {
        op.value.get(1).and_then(Value::as_u64).unwrap_or(0)
    }

    fn write_value(op: &Operation) -> &str {
        op.value.first().and_then(Value::as_str).unwrap_or("")
    }

    fn is_write(op: &Operation) -> bool {
        op.drp_type == DrpKind::Drp && op.op_type == "write"
    }
}

impl Drp for LwwRegister {
    fn semantics(&self) -> Semantics {
        Semantics::Pairwise
    }

    fn resolve_pair(&self, left: &Operation, right: &Operation) -> Verdict {
        if !Self::is_write(left) || !Self::is_write(right) {
            return Verdict::NoConflict;
        }
        let (left_at, right_at) = (Self::write_stamp(left), Self::write_stamp(right));
        if left_at < right_at {
            Verdict::DropLeft
        } else if right_at < left_at {
            Verdict::DropRight
        } else if Self::write_value(left) <= Self::write_value(right) {
            Verdict::DropLeft
        } else {
            Verdict::DropRight
        }
    }

    fn apply(&mut self, op_type: &str, args: &[Value]) -> Result<Value, DrpError> {
        match op_type {
            "write" => {
                let value = args.first().and_then(Value::as_str).ok_or_else(|| {
                    DrpError::BadArguments {
                        op_type: op_type.to_string(),
                        reason: "expected a string value".to_string(),
                    }
                })?;
                self.value = Some(value.to_string());
                self.at = args.get(1).and_then(Value::as_u64).unwrap_or(0);
                Ok(Value::Null)
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
        state.insert("at", json!(self.at));
        state
    }

    fn set_state(&mut self, state: &DrpState) {
        if let Some(value) = state.get("value") {
            self.value = value.as_str().map(str::to_string);
        }
        if let Some(at) = state.get("at").and_then(Value::as_u64) {
            self.at = at;
        }
    }

    fn clone_box(&self) -> Box<dyn Drp> {
        Box::new(self.clone())
    }
}

pub fn peer(name: &str) -> PeerId {
    PeerId::new_unchecked(name)
}

/// Every vertex except the root, in topological (causal) order, the way a
/// sync layer would ship them.
pub fn non_root_vertices(object: &DrpObject) -> Vec<Vertex> {
    let root = object.graph().root_hash();
    object
        .graph()
        .topological_sort()
        .into_iter()
        .filter(|hash| *hash != root)
        .filter_map(|hash| object.graph().get(&hash).cloned())
        .collect()
}
