//! Construction and validation of locally-originated writes.
//!
//! Misuse is rejected synchronously, before any network I/O: writing to
//! an object of the wrong kind, to a tombstoned object, or with values a
//! counter cannot carry all fail here.

use crate::error::{Result, SyncError};
use crate::message::ObjectMessage;
use rso_core::map::MapEntry;
use rso_core::{ObjectId, ObjectOperation, ObjectPool, ObjectType, Value};
use std::collections::BTreeMap;

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SyncError::InvalidWrite("map key must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() {
        return Err(SyncError::InvalidWrite(
            "counter amount must be a finite number".into(),
        ));
    }
    Ok(())
}

/// The target must exist, be of the expected kind and not be tombstoned.
pub(crate) fn validate_target(
    pool: &ObjectPool,
    target: &ObjectId,
    expected: ObjectType,
) -> Result<()> {
    let object = pool
        .get(target)
        .ok_or_else(|| SyncError::InvalidWrite(format!("unknown object {}", target)))?;
    if object.object_type() != expected {
        return Err(SyncError::InvalidWrite(format!(
            "object {} is not a {}",
            target, expected
        )));
    }
    if object.is_tombstoned() {
        return Err(SyncError::InvalidWrite(format!(
            "object {} has been deleted",
            target
        )));
    }
    Ok(())
}

pub(crate) fn map_set(target: &ObjectId, key: &str, value: Value) -> ObjectMessage {
    ObjectMessage::new(
        target.clone(),
        ObjectOperation::MapSet {
            key: key.to_string(),
            value,
        },
    )
}

pub(crate) fn map_remove(target: &ObjectId, key: &str) -> ObjectMessage {
    ObjectMessage::new(
        target.clone(),
        ObjectOperation::MapRemove {
            key: key.to_string(),
        },
    )
}

pub(crate) fn counter_inc(target: &ObjectId, amount: f64) -> ObjectMessage {
    ObjectMessage::new(target.clone(), ObjectOperation::CounterInc { amount })
}

/// Build a MAP_CREATE with a freshly derived id. The id hashes the
/// initial entries plus a random nonce, so identical initial values on
/// different clients still create distinct objects.
pub(crate) fn map_create(
    initial: BTreeMap<String, Value>,
    timestamp: u64,
) -> Result<(ObjectId, ObjectMessage)> {
    let entries: BTreeMap<String, MapEntry> = initial
        .into_iter()
        .map(|(key, value)| (key, MapEntry::live(value, None)))
        .collect();
    let payload = serde_json::to_vec(&entries)
        .map_err(|e| SyncError::InvalidWrite(format!("unencodable initial value: {}", e)))?;
    let nonce: [u8; 16] = rand::random();
    let id = ObjectId::generate(ObjectType::Map, &payload, &nonce, timestamp);
    let message = ObjectMessage::new(id.clone(), ObjectOperation::MapCreate { entries });
    Ok((id, message))
}

/// Build a COUNTER_CREATE with a freshly derived id.
pub(crate) fn counter_create(count: f64, timestamp: u64) -> Result<(ObjectId, ObjectMessage)> {
    validate_amount(count)?;
    let payload = count.to_le_bytes();
    let nonce: [u8; 16] = rand::random();
    let id = ObjectId::generate(ObjectType::Counter, &payload, &nonce, timestamp);
    let message = ObjectMessage::new(
        id.clone(),
        ObjectOperation::CounterCreate { count: Some(count) },
    );
    Ok((id, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_kind_and_tombstone() {
        let mut pool = ObjectPool::new();
        let counter = ObjectId::generate(ObjectType::Counter, b"0", b"n", 1);
        pool.ensure_exists(&counter);

        assert!(validate_target(&pool, &ObjectId::root(), ObjectType::Map).is_ok());
        assert!(validate_target(&pool, &counter, ObjectType::Map).is_err());
        assert!(validate_target(&pool, &counter, ObjectType::Counter).is_ok());

        let unknown = ObjectId::generate(ObjectType::Map, b"x", b"n", 1);
        assert!(validate_target(&pool, &unknown, ObjectType::Map).is_err());
    }

    #[test]
    fn test_validate_amount_rejects_non_finite() {
        assert!(validate_amount(1.5).is_ok());
        assert!(validate_amount(f64::NAN).is_err());
        assert!(validate_amount(f64::INFINITY).is_err());
    }

    #[test]
    fn test_map_create_derives_distinct_ids() {
        let initial: BTreeMap<String, Value> = BTreeMap::from([("k".to_string(), "v".into())]);
        let (a, msg) = map_create(initial.clone(), 1).unwrap();
        let (b, _) = map_create(initial, 1).unwrap();
        // The nonce keeps identical initial values from colliding.
        assert_ne!(a, b);
        assert_eq!(msg.object_id, a);
        assert_eq!(a.object_type(), ObjectType::Map);
    }
}
