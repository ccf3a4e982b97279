//! Object identifiers.
//!
//! An object id is an opaque string `{type}:{hash}@{creationTimestamp}`
//! where the hash is SHA-256 over the object's initial-value payload plus a
//! random nonce, rendered as hex. Identity is self-certifying: two create
//! operations carrying the same id are guaranteed to carry the same initial
//! value, which is what makes duplicate creates safe to ignore after the
//! first merge.
//!
//! The root of every channel's object graph is the distinguished id
//! `"root"`, which is always a map.

use crate::error::{ObjectError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The id of the implicit root map.
pub const ROOT_OBJECT_ID: &str = "root";

/// The kind of collection an object id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Map,
    Counter,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Map => "map",
            ObjectType::Counter => "counter",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque, immutable object identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// The distinguished root map id.
    pub fn root() -> Self {
        Self(ROOT_OBJECT_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_OBJECT_ID
    }

    /// Parse and validate an id string.
    pub fn parse(input: &str) -> Result<Self> {
        if input == ROOT_OBJECT_ID {
            return Ok(Self::root());
        }
        let invalid = || ObjectError::InvalidObjectId(input.to_string());

        let (object_type, rest) = input.split_once(':').ok_or_else(invalid)?;
        if !matches!(object_type, "map" | "counter") {
            return Err(invalid());
        }
        let (hash, timestamp) = rest.split_once('@').ok_or_else(invalid)?;
        if hash.is_empty() || timestamp.parse::<u64>().is_err() {
            return Err(invalid());
        }
        Ok(Self(input.to_string()))
    }

    /// Derive a fresh id from an initial-value payload, a nonce and the
    /// creation timestamp.
    pub fn generate(
        object_type: ObjectType,
        initial_value: &[u8],
        nonce: &[u8],
        timestamp: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(initial_value);
        hasher.update(nonce);
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self(format!("{}:{}@{}", object_type.as_str(), hash, timestamp))
    }

    /// The collection kind this id refers to. The root id is a map.
    pub fn object_type(&self) -> ObjectType {
        if self.is_root() || self.0.starts_with("map:") {
            ObjectType::Map
        } else {
            ObjectType::Counter
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_id() {
        let root = ObjectId::root();
        assert!(root.is_root());
        assert_eq!(root.object_type(), ObjectType::Map);
        assert_eq!(ObjectId::parse("root").unwrap(), root);
    }

    #[test]
    fn test_generate_shape() {
        let id = ObjectId::generate(ObjectType::Map, b"{}", b"nonce", 1700000000000);
        assert!(id.as_str().starts_with("map:"));
        assert!(id.as_str().ends_with("@1700000000000"));
        assert_eq!(id.object_type(), ObjectType::Map);
        assert_eq!(ObjectId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_generate_is_content_addressed() {
        let a = ObjectId::generate(ObjectType::Counter, b"5", b"n1", 1);
        let b = ObjectId::generate(ObjectType::Counter, b"5", b"n1", 1);
        let c = ObjectId::generate(ObjectType::Counter, b"5", b"n2", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.object_type(), ObjectType::Counter);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "map", "map:", "map:abc", "set:abc@1", "map:abc@x", "map:@1"] {
            assert!(ObjectId::parse(input).is_err(), "accepted {:?}", input);
        }
    }
}
