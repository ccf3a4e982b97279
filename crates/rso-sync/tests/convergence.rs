//! Convergence tests for the object graph under adverse delivery.
//!
//! These exercise the whole engine path (`handle_operation_messages`
//! through the pool's merge logic) under reordering, duplication and
//! late tombstones, the conditions the timeserial gate exists for.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rso_core::{ObjectId, ObjectOperation, ObjectType, Timeserial, Value};
use rso_sync::{MemoryChannel, ObjectMessage, SyncEngine};
use std::sync::Arc;

fn engine() -> SyncEngine<MemoryChannel> {
    let engine = SyncEngine::new(Arc::new(MemoryChannel::new("local")));
    // Attach without objects: an empty commit, immediately synced.
    engine.handle_attached(false);
    engine
}

fn op_msg(id: &ObjectId, op: ObjectOperation, site: &str, timestamp: u64) -> ObjectMessage {
    let mut message = ObjectMessage::new(id.clone(), op);
    message.site_code = Some(site.to_string());
    message.serial = Some(Timeserial::new(site, timestamp, 0));
    message
}

fn set_msg(id: &ObjectId, key: &str, value: Value, site: &str, timestamp: u64) -> ObjectMessage {
    op_msg(
        id,
        ObjectOperation::MapSet {
            key: key.to_string(),
            value,
        },
        site,
        timestamp,
    )
}

#[test]
fn test_lww_set_converges_in_either_order() {
    let root = ObjectId::root();
    let older = set_msg(&root, "x", "v1".into(), "siteA", 1);
    let newer = set_msg(&root, "x", "v2".into(), "siteB", 2);

    let forward = engine();
    forward
        .handle_operation_messages(vec![older.clone(), newer.clone()])
        .unwrap();

    let backward = engine();
    backward
        .handle_operation_messages(vec![newer, older])
        .unwrap();

    assert_eq!(forward.map_get(&root, "x"), Some("v2".into()));
    assert_eq!(backward.map_get(&root, "x"), Some("v2".into()));
}

#[test]
fn test_counter_converges_in_any_order() {
    let id = ObjectId::generate(ObjectType::Counter, b"c", b"n", 1);
    let ops = vec![
        op_msg(
            &id,
            ObjectOperation::CounterCreate { count: Some(5.0) },
            "siteA",
            1,
        ),
        op_msg(&id, ObjectOperation::CounterInc { amount: 3.0 }, "siteB", 1),
        op_msg(
            &id,
            ObjectOperation::CounterInc { amount: -1.0 },
            "siteC",
            1,
        ),
    ];

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for _ in 0..10 {
        let mut shuffled = ops.clone();
        shuffled.shuffle(&mut rng);

        let engine = engine();
        engine.handle_operation_messages(shuffled).unwrap();
        assert_eq!(engine.counter_value(&id), Some(7.0));
    }
}

#[test]
fn test_random_map_histories_converge() {
    let root = ObjectId::root();
    let keys = ["a", "b", "c", "d"];
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    // Distinct site per operation keeps every permutation admissible
    // through the per-site gate; the per-entry LWW gate decides.
    let ops: Vec<ObjectMessage> = (0..40)
        .map(|i| {
            let key = keys[i % keys.len()];
            let site = format!("site{}", i);
            if i % 5 == 4 {
                op_msg(
                    &root,
                    ObjectOperation::MapRemove {
                        key: key.to_string(),
                    },
                    &site,
                    i as u64 + 1,
                )
            } else {
                set_msg(&root, key, (i as i64).into(), &site, i as u64 + 1)
            }
        })
        .collect();

    let reference = engine();
    reference.handle_operation_messages(ops.clone()).unwrap();
    let expected = reference.compact_json(&root).unwrap();

    for _ in 0..5 {
        let mut shuffled = ops.clone();
        shuffled.shuffle(&mut rng);
        let other = engine();
        other.handle_operation_messages(shuffled).unwrap();
        assert_eq!(other.compact_json(&root).unwrap(), expected);
    }
}

#[test]
fn test_duplicate_delivery_is_idempotent() {
    let root = ObjectId::root();
    let counter = ObjectId::generate(ObjectType::Counter, b"c", b"n", 1);
    let ops = vec![
        set_msg(&root, "x", "v".into(), "siteA", 1),
        op_msg(
            &counter,
            ObjectOperation::CounterInc { amount: 4.0 },
            "siteB",
            1,
        ),
    ];

    let once = engine();
    once.handle_operation_messages(ops.clone()).unwrap();

    let twice = engine();
    twice.handle_operation_messages(ops.clone()).unwrap();
    twice.handle_operation_messages(ops).unwrap();

    assert_eq!(
        once.compact_json(&ObjectId::root()),
        twice.compact_json(&ObjectId::root())
    );
    assert_eq!(twice.counter_value(&counter), Some(4.0));
}

#[test]
fn test_tombstoned_object_ignores_later_operations() {
    let child = ObjectId::generate(ObjectType::Map, b"m", b"n", 1);
    let engine = engine();
    engine
        .handle_operation_messages(vec![
            set_msg(&ObjectId::root(), "child", child.clone().into(), "siteA", 1),
            set_msg(&child, "k", "v".into(), "siteA", 2),
            op_msg(&child, ObjectOperation::ObjectDelete, "siteB", 5),
            // Larger serial, later arrival: still a no-op.
            set_msg(&child, "k", "revived".into(), "siteC", 9),
        ])
        .unwrap();

    assert_eq!(engine.map_get(&child, "k"), None);
    // The entry in root resolving to the tombstoned child reads absent.
    assert_eq!(engine.map_get(&ObjectId::root(), "child"), None);
}

#[test]
fn test_referencing_unseen_object_materializes_placeholder() {
    let unseen = ObjectId::generate(ObjectType::Map, b"later", b"n", 1);
    let engine = engine();
    engine
        .handle_operation_messages(vec![set_msg(
            &ObjectId::root(),
            "pending",
            unseen.clone().into(),
            "siteA",
            1,
        )])
        .unwrap();

    // A usable zero-value map, not absent.
    assert_eq!(
        engine.map_get(&ObjectId::root(), "pending"),
        Some(Value::Reference(unseen.clone()))
    );
    assert_eq!(
        engine.compact_json(&unseen).unwrap(),
        serde_json::json!({})
    );

    // Its create arrives afterwards and fills it in.
    let mut entries = std::collections::BTreeMap::new();
    entries.insert(
        "k".to_string(),
        rso_core::map::MapEntry::live("v".into(), Some(Timeserial::new("siteA", 2, 0))),
    );
    engine
        .handle_operation_messages(vec![op_msg(
            &unseen,
            ObjectOperation::MapCreate { entries },
            "siteA",
            3,
        )])
        .unwrap();
    assert_eq!(engine.map_get(&unseen, "k"), Some("v".into()));
}

#[test]
fn test_malformed_messages_do_not_stall_the_stream() {
    let root = ObjectId::root();
    let engine = engine();

    let mut no_site = set_msg(&root, "skipped", "v".into(), "siteA", 1);
    no_site.site_code = None;
    // A counter action addressed at the root map is mistyped.
    let mistyped = op_msg(&root, ObjectOperation::CounterInc { amount: 1.0 }, "siteB", 1);
    let good = set_msg(&root, "applied", "v".into(), "siteC", 1);

    engine
        .handle_operation_messages(vec![no_site, mistyped, good])
        .unwrap();

    assert_eq!(engine.map_get(&root, "skipped"), None);
    assert_eq!(engine.map_get(&root, "applied"), Some("v".into()));
}
