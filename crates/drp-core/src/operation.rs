//! Layer 3: Operations
//!
//! An operation names a mutating method on one of the two state tracks and
//! carries its serialized arguments. `query_*` paths are pure reads and are
//! intercepted before they ever reach a vertex.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Methods whose names start with this prefix never create vertices.
pub const QUERY_PREFIX: &str = "query_";

/// Which state track an operation mutates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DrpKind {
    #[serde(rename = "DRP")]
    Drp,
    #[serde(rename = "ACL")]
    Acl,
}

impl DrpKind {
    pub fn opposite(self) -> Self {
        match self {
            DrpKind::Drp => DrpKind::Acl,
            DrpKind::Acl => DrpKind::Drp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "drpType")]
    pub drp_type: DrpKind,
    #[serde(rename = "opType")]
    pub op_type: String,
    pub value: Vec<Value>,
}

impl Operation {
    pub fn new(drp_type: DrpKind, op_type: impl Into<String>, value: Vec<Value>) -> Self {
        Self {
            drp_type,
            op_type: op_type.into(),
            value,
        }
    }

    pub fn is_query(&self) -> bool {
        self.op_type.starts_with(QUERY_PREFIX)
    }

    /// The operation carried by the root vertex. Never replayed.
    pub fn root_sentinel() -> Self {
        Self {
            drp_type: DrpKind::Drp,
            op_type: "-1".to_string(),
            value: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_prefix_detection() {
        let q = Operation::new(DrpKind::Drp, "query_read", vec![]);
        let m = Operation::new(DrpKind::Drp, "increment", vec![json!(1)]);
        assert!(q.is_query());
        assert!(!m.is_query());
    }

    #[test]
    fn serde_uses_wire_field_names() {
        let op = Operation::new(DrpKind::Acl, "grant", vec![json!("p2")]);
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["drpType"], "ACL");
        assert_eq!(value["opType"], "grant");
        assert_eq!(value["value"][0], "p2");
    }
}
