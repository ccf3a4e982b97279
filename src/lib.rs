//! Citrine - a replicated shared-object store.
//!
//! A per-channel graph of mutable collection objects (last-writer-wins
//! maps and commutative counters) that every connected client converges
//! on, even though operations and snapshot state arrive over an
//! unreliable, paginated, possibly-reordered message stream.
//!
//! The workspace splits into two layers, re-exported here:
//!
//! - [`rso_core`]: the object model and CRDT merge engine - timeserials,
//!   content-addressed object ids, the live-object pool with its
//!   parent-reference graph, tombstone lifecycle and cycle-safe export.
//! - [`rso_sync`]: the synchronization layer - the channel adapter
//!   abstraction, the paginated snapshot accumulator, the sync
//!   orchestrator with optimistic local apply, the path subscription
//!   router and the batched-write helper.
//!
//! # Example
//!
//! ```rust
//! use citrine::{MemoryChannel, ObjectId, SyncEngine};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = SyncEngine::new(Arc::new(MemoryChannel::new("local")));
//!
//! // The channel attached with no server-side objects: the engine is
//! // immediately synced with an empty root map.
//! engine.handle_attached(false);
//!
//! let root = engine.root().await.unwrap();
//! engine.set(&root, "greeting", "hello".into()).await.unwrap();
//! assert_eq!(engine.map_get(&root, "greeting"), Some("hello".into()));
//! # });
//! ```

pub use rso_core;
pub use rso_sync;

pub use rso_core::map::MapEntry;
pub use rso_core::{
    CompactValue, LiveObject, ObjectData, ObjectError, ObjectId, ObjectOperation, ObjectPool,
    ObjectState, ObjectType, ObjectUpdate, ParentRef, Primitive, Timeserial, Value,
};
pub use rso_sync::{
    Batch, ChangeEvent, ChannelAdapter, ChannelState, EngineConfig, EngineConfigBuilder,
    EngineEvent, ErrorInfo, MemoryChannel, ObjectMessage, PathFilter, PublishAck, Router,
    SnapshotAccumulator, SubscriptionId, SyncCursor, SyncEngine, SyncError, SyncPhase,
};
