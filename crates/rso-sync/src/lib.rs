//! Synchronization layer for the Citrine replicated shared-object store.
//!
//! Everything above the core merge engine lives here: the channel
//! adapter abstraction, the paginated snapshot accumulator, the sync
//! orchestrator, the path subscription router and the batched-write
//! helper.

pub mod accumulator;
pub mod batch;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod router;
mod write;

pub use accumulator::SnapshotAccumulator;
pub use batch::Batch;
pub use channel::{ChannelAdapter, ChannelState, ErrorInfo, MemoryChannel};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{EngineEvent, SyncEngine, SyncPhase};
pub use error::{Result, SyncError};
pub use message::{ObjectMessage, PublishAck, SyncCursor};
pub use router::{ChangeEvent, PathFilter, Router, SubscriptionId};
