//! Values storable in map entries.
//!
//! A map entry holds either a primitive leaf or a reference-by-id to
//! another live object in the pool. References are what make the object
//! graph composable (and potentially cyclic): they are never owning
//! pointers, only id-valued lookups resolved through the pool.

use crate::objectid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A primitive leaf value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Primitive {
    /// Render as JSON. Binary leaves become a hex string so the output is
    /// text-safe regardless of the active wire format.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Primitive::Bool(b) => json!(b),
            Primitive::Number(n) => json!(n),
            Primitive::String(s) => json!(s),
            Primitive::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                json!(hex)
            }
            Primitive::Json(v) => v.clone(),
        }
    }
}

/// What a map entry points at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Primitive(Primitive),
    Reference(ObjectId),
}

impl Value {
    pub fn as_reference(&self) -> Option<&ObjectId> {
        match self {
            Value::Reference(id) => Some(id),
            Value::Primitive(_) => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            Value::Reference(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Primitive(Primitive::Bool(b))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Primitive(Primitive::Number(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Primitive(Primitive::Number(n as f64))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Primitive(Primitive::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Primitive(Primitive::String(s))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Primitive(Primitive::Bytes(bytes))
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Reference(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_render_as_hex() {
        let p = Primitive::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(p.to_json(), json!("deadbeef"));
    }

    #[test]
    fn test_reference_accessors() {
        let v: Value = ObjectId::root().into();
        assert_eq!(v.as_reference(), Some(&ObjectId::root()));
        assert!(v.as_primitive().is_none());

        let v: Value = "hello".into();
        assert!(v.as_reference().is_none());
    }

    #[test]
    fn test_value_serialization() {
        let v: Value = 42i64.into();
        let s = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
    }
}
