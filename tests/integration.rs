//! End-to-end exercise of the full stack through the facade crate:
//! attach, paginated sync, optimistic local writes, nested objects,
//! subscriptions and export.

use citrine::{
    MapEntry, MemoryChannel, ObjectId, ObjectOperation, ObjectState, ObjectType, PathFilter,
    SyncCursor, SyncEngine, SyncPhase, Timeserial, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test]
async fn test_full_session_lifecycle() {
    let channel = Arc::new(MemoryChannel::new("local"));
    let engine = SyncEngine::new(Arc::clone(&channel));

    // Server-driven sync: two pages under one sequence.
    engine.handle_attached(true);
    assert_eq!(engine.phase(), SyncPhase::Syncing);

    let counter_id = ObjectId::generate(ObjectType::Counter, b"visits", b"n", 1);
    let mut root = ObjectState::new(ObjectId::root());
    let mut entries = BTreeMap::new();
    entries.insert(
        "visits".to_string(),
        MapEntry::live(counter_id.clone().into(), Some(Timeserial::new("srv", 1, 0))),
    );
    root.map_entries = Some(entries);
    engine.handle_snapshot_message(vec![root], &SyncCursor::parse("seq:more").unwrap());

    let mut counter = ObjectState::new(counter_id.clone());
    counter.counter_count = Some(41.0);
    engine.handle_snapshot_message(vec![counter], &SyncCursor::parse("seq:").unwrap());
    assert_eq!(engine.phase(), SyncPhase::Synced);

    let root_id = engine.root().await.unwrap();
    assert_eq!(engine.counter_value(&counter_id), Some(41.0));

    // Local writes: bump the counter, hang a profile map off the root.
    let (_, mut events) = engine.subscribe(PathFilter::subtree(Vec::new()));
    engine.increment(&counter_id, 1.0).await.unwrap();
    assert_eq!(engine.counter_value(&counter_id), Some(42.0));

    let profile = engine
        .create_map(BTreeMap::from([(
            "name".to_string(),
            Value::from("ada"),
        )]))
        .await
        .unwrap();
    engine
        .set(&root_id, "profile", profile.clone().into())
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.path, vec!["visits"]);

    let exported = engine.compact_json(&root_id).unwrap();
    assert_eq!(exported["visits"], serde_json::json!(42.0));
    assert_eq!(exported["profile"]["name"], serde_json::json!("ada"));

    // A remote tombstone for the profile wins over any later write.
    let mut delete = citrine::ObjectMessage::new(profile.clone(), ObjectOperation::ObjectDelete);
    delete.site_code = Some("siteB".to_string());
    delete.serial = Some(Timeserial::new("siteB", 100, 0));
    engine.handle_operation_messages(vec![delete]).unwrap();
    assert_eq!(engine.map_get(&root_id, "profile"), None);
}
