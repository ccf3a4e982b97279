//! The sync/operation orchestrator.
//!
//! The engine owns the pool and drives it through the sync state machine:
//! `Uninitialized -> Syncing -> Synced`, re-entering `Syncing` on every
//! channel (re)attach. Snapshot pages feed the accumulator; regular
//! operation messages received mid-sync are buffered and replayed after
//! commit; local writes are published first and applied optimistically
//! once acknowledged, with the later channel echo suppressed through the
//! pending-acknowledgment set.
//!
//! Everything mutating runs synchronously inside the handler that
//! received the message; the only suspension points are awaiting the
//! publish acknowledgment and awaiting a `Synced` transition, both
//! abandoned with a channel-state error if the channel becomes unusable.

use crate::accumulator::SnapshotAccumulator;
use crate::batch::Batch;
use crate::channel::{ChannelAdapter, ChannelState};
use crate::config::{EngineConfig, DEFAULT_GC_GRACE_PERIOD};
use crate::error::{Result, SyncError};
use crate::message::{ObjectMessage, SyncCursor};
use crate::router::{ChangeEvent, PathFilter, Router, SubscriptionId};
use crate::write;
use parking_lot::RwLock;
use rso_core::pool::GcStats;
use rso_core::{
    ObjectError, ObjectId, ObjectPool, ObjectState, ObjectType, ObjectUpdate, Value,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Where the sync state machine currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Uninitialized,
    Syncing,
    Synced,
}

/// Events emitted by the engine.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    PhaseChanged(SyncPhase),
    ChannelStateChanged(ChannelState),
    SyncCompleted { objects: usize },
}

/// Whether an application came off the wire or from a local ack replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApplySource {
    Remote,
    Local,
}

struct EngineInner {
    pool: ObjectPool,
    accumulator: SnapshotAccumulator,
    phase: SyncPhase,
    /// Operation messages received while a sync was in flight, in
    /// receipt order.
    buffered: Vec<ObjectMessage>,
    /// Serials of acknowledged local writes whose channel echo has not
    /// arrived yet.
    pending_acks: HashSet<String>,
}

/// The synchronization engine for one channel's object graph.
pub struct SyncEngine<C: ChannelAdapter> {
    channel: Arc<C>,
    inner: Arc<RwLock<EngineInner>>,
    router: Arc<Router>,
    events: broadcast::Sender<EngineEvent>,
    config: EngineConfig,
}

impl<C: ChannelAdapter> SyncEngine<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self::with_config(channel, EngineConfig::default())
    }

    pub fn with_config(channel: Arc<C>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            channel,
            inner: Arc::new(RwLock::new(EngineInner {
                pool: ObjectPool::new(),
                accumulator: SnapshotAccumulator::new(),
                phase: SyncPhase::Uninitialized,
                buffered: Vec::new(),
                pending_acks: HashSet::new(),
            })),
            router: Arc::new(Router::new()),
            events,
            config,
        }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.read().phase
    }

    /// Subscribe to engine lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Read access to the pool between handler callbacks.
    pub fn with_pool<R>(&self, f: impl FnOnce(&ObjectPool) -> R) -> R {
        f(&self.inner.read().pool)
    }

    pub fn map_get(&self, map_id: &ObjectId, key: &str) -> Option<Value> {
        self.with_pool(|pool| pool.map_get(map_id, key))
    }

    pub fn counter_value(&self, id: &ObjectId) -> Option<f64> {
        self.with_pool(|pool| pool.counter_value(id))
    }

    pub fn compact_json(&self, id: &ObjectId) -> Option<serde_json::Value> {
        self.with_pool(|pool| pool.compact_json(id))
    }

    /// Subscribe to change events under a path.
    pub fn subscribe(
        &self,
        filter: PathFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>) {
        self.router.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Channel-driven transitions
    // ------------------------------------------------------------------

    /// The channel (re)attached. Without objects the pool resets to just
    /// its root and the engine is immediately synced; with objects a
    /// snapshot sequence is expected to follow.
    pub fn handle_attached(&self, has_objects: bool) {
        let mut inner = self.inner.write();
        if has_objects {
            self.set_phase(&mut inner, SyncPhase::Syncing);
        } else {
            inner.pool.reset_to_root();
            inner.accumulator.reset();
            inner.buffered.clear();
            self.set_phase(&mut inner, SyncPhase::Synced);
            let _ = self.events.send(EngineEvent::SyncCompleted { objects: 0 });
        }
    }

    /// The channel moved to a new state. Wakes any task waiting on a
    /// sync transition so it can abandon the wait if the channel became
    /// unusable.
    pub fn handle_state_change(&self, state: ChannelState) {
        debug!(%state, "channel state changed");
        let _ = self.events.send(EngineEvent::ChannelStateChanged(state));
    }

    /// One snapshot page. A page carrying an unfamiliar sequence id
    /// discards all buffered operations and any partial accumulation
    /// before being ingested; the final page (empty cursor) commits.
    pub fn handle_snapshot_message(&self, states: Vec<ObjectState>, cursor: &SyncCursor) {
        let mut inner = self.inner.write();
        if inner.accumulator.sequence_id() != Some(cursor.sequence_id.as_str()) {
            if inner.accumulator.sequence_id().is_some() {
                debug!(
                    sequence = %cursor.sequence_id,
                    "new sync sequence, discarding stale accumulation"
                );
            }
            inner.buffered.clear();
            inner.accumulator.begin_sequence(&cursor.sequence_id);
            self.set_phase(&mut inner, SyncPhase::Syncing);
        }
        for state in states {
            inner.accumulator.ingest(state);
        }
        if cursor.is_final() {
            self.commit(&mut inner);
        }
    }

    /// Regular operation messages from the channel. Buffered while a
    /// sync is in flight (they may already be reflected in it), applied
    /// directly otherwise.
    pub fn handle_operation_messages(&self, messages: Vec<ObjectMessage>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.phase != SyncPhase::Synced {
            inner.buffered.extend(messages);
            return Ok(());
        }
        for message in &messages {
            self.apply_message(&mut inner, message, ApplySource::Remote)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Publish `messages` as one network write, then replay them locally
    /// once acknowledged. If the engine is mid-sync the local replay
    /// waits for the next `Synced` transition - applying an echo against
    /// a pool that is being rebuilt would be meaningless.
    pub async fn publish_and_apply_locally(&self, messages: Vec<ObjectMessage>) -> Result<()> {
        let total: usize = messages.iter().map(|m| m.size_hint()).sum();
        let max = self.channel.max_message_size();
        if total > max {
            return Err(SyncError::MessageTooLarge { size: total, max });
        }
        self.ensure_channel_usable()?;

        let ack = self.channel.publish(messages.clone()).await?;
        self.wait_until_synced().await?;

        let mut inner = self.inner.write();
        for (message, serial) in messages.into_iter().zip(ack.serials.into_iter()) {
            // A null serial means the server told us not to apply this
            // one locally.
            let Some(serial) = serial else { continue };
            inner.pending_acks.insert(serial.to_string());
            let mut local = message;
            local.serial = Some(serial);
            local.site_code = Some(ack.origin_site.clone());
            self.apply_message(&mut inner, &local, ApplySource::Local)?;
        }
        Ok(())
    }

    /// Resolve once the engine reaches `Synced`, abandoning the wait
    /// with the channel's error if the channel becomes unusable first.
    pub async fn wait_until_synced(&self) -> Result<()> {
        let mut events = self.events.subscribe();
        loop {
            if self.inner.read().phase == SyncPhase::Synced {
                return Ok(());
            }
            let state = self.channel.state();
            if !state.is_usable() {
                return Err(self.channel_unusable(state));
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(self.channel_unusable(self.channel.state()))
                }
            }
        }
    }

    /// The root map, available once the first sync completes.
    pub async fn root(&self) -> Result<ObjectId> {
        self.wait_until_synced().await?;
        Ok(ObjectId::root())
    }

    pub async fn set(&self, target: &ObjectId, key: &str, value: Value) -> Result<()> {
        write::validate_key(key)?;
        self.with_pool(|pool| write::validate_target(pool, target, ObjectType::Map))?;
        self.publish_and_apply_locally(vec![write::map_set(target, key, value)])
            .await
    }

    pub async fn remove(&self, target: &ObjectId, key: &str) -> Result<()> {
        write::validate_key(key)?;
        self.with_pool(|pool| write::validate_target(pool, target, ObjectType::Map))?;
        self.publish_and_apply_locally(vec![write::map_remove(target, key)])
            .await
    }

    pub async fn increment(&self, target: &ObjectId, amount: f64) -> Result<()> {
        write::validate_amount(amount)?;
        self.with_pool(|pool| write::validate_target(pool, target, ObjectType::Counter))?;
        self.publish_and_apply_locally(vec![write::counter_inc(target, amount)])
            .await
    }

    pub async fn decrement(&self, target: &ObjectId, amount: f64) -> Result<()> {
        self.increment(target, -amount).await
    }

    /// Create a map with `initial` entries; returns its id once the
    /// create has been acknowledged and applied locally.
    pub async fn create_map(&self, initial: BTreeMap<String, Value>) -> Result<ObjectId> {
        let (id, message) = write::map_create(initial, now_ms())?;
        self.publish_and_apply_locally(vec![message]).await?;
        Ok(id)
    }

    /// Create a counter with an initial count; returns its id once the
    /// create has been acknowledged and applied locally.
    pub async fn create_counter(&self, count: f64) -> Result<ObjectId> {
        let (id, message) = write::counter_create(count, now_ms())?;
        self.publish_and_apply_locally(vec![message]).await?;
        Ok(id)
    }

    /// Start a batch that groups multiple mutations into one publish.
    pub fn batch(&self) -> Batch<'_, C> {
        Batch::new(self)
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// One sweep over the pool with the effective grace period.
    pub fn gc_sweep(&self) -> GcStats {
        let grace = self.gc_grace();
        let stats = self
            .inner
            .write()
            .pool
            .gc_sweep(now_ms(), grace.as_millis() as u64);
        if stats.entries_swept > 0 || stats.objects_swept > 0 {
            debug!(
                entries = stats.entries_swept,
                objects = stats.objects_swept,
                "gc sweep"
            );
        }
        stats
    }

    /// Background periodic sweeps; fire-and-forget, never surfacing
    /// errors. Abort the returned handle to stop.
    pub fn spawn_gc(&self) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let grace = self.gc_grace();
        let interval = self.config.gc_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = inner
                    .write()
                    .pool
                    .gc_sweep(now_ms(), grace.as_millis() as u64);
                if stats.entries_swept > 0 || stats.objects_swept > 0 {
                    debug!(
                        entries = stats.entries_swept,
                        objects = stats.objects_swept,
                        "background gc sweep"
                    );
                }
            }
        })
    }

    /// Server-advertised grace period, then the configured override,
    /// then the local default.
    fn gc_grace(&self) -> Duration {
        self.channel
            .gc_grace_period()
            .or(self.config.gc_grace_period)
            .unwrap_or(DEFAULT_GC_GRACE_PERIOD)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_phase(&self, inner: &mut EngineInner, phase: SyncPhase) {
        if inner.phase != phase {
            inner.phase = phase;
            let _ = self.events.send(EngineEvent::PhaseChanged(phase));
        }
    }

    /// Commit the accumulated snapshot: apply every entry, evict ids the
    /// snapshot did not include, rebuild the parent graph, then notify -
    /// strictly in that order, so observers never see a half-migrated
    /// graph. Buffered operations replay afterwards in receipt order.
    fn commit(&self, inner: &mut EngineInner) {
        let now = now_ms();
        let states = inner.accumulator.take();
        let objects = states.len();
        let mut received: HashSet<ObjectId> = HashSet::with_capacity(states.len());
        let mut updates: Vec<(ObjectId, ObjectUpdate)> = Vec::new();

        for state in &states {
            received.insert(state.object_id.clone());
            match inner.pool.apply_state(state, now) {
                Ok(Some(update)) => updates.push((state.object_id.clone(), update)),
                Ok(None) => {}
                Err(error) => {
                    warn!(object_id = %state.object_id, %error, "dropping unappliable snapshot entry");
                }
            }
        }

        inner.pool.evict_ids_not_in(&received);
        inner.pool.rebuild_parent_references();
        self.set_phase(inner, SyncPhase::Synced);

        for (id, update) in updates {
            self.notify(inner, &id, update);
        }

        let buffered = std::mem::take(&mut inner.buffered);
        for message in &buffered {
            if let Err(error) = self.apply_message(inner, message, ApplySource::Remote) {
                warn!(%error, "dropping buffered operation during replay");
            }
        }

        let _ = self.events.send(EngineEvent::SyncCompleted { objects });
    }

    /// The normal operation-apply path for one decoded message.
    fn apply_message(
        &self,
        inner: &mut EngineInner,
        message: &ObjectMessage,
        source: ApplySource,
    ) -> Result<()> {
        if source == ApplySource::Remote {
            if let Some(serial) = &message.serial {
                // The optimistic echo of an acknowledged local write
                // comes back over the channel; it was already applied.
                if inner.pending_acks.remove(&serial.to_string()) {
                    return Ok(());
                }
            }
        }

        let Some(site) = message.site_code.as_deref() else {
            warn!(object_id = %message.object_id, action = message.operation.action(),
                "dropping operation without a site code");
            return Ok(());
        };

        inner.pool.ensure_exists(&message.object_id);
        let now = message.server_timestamp.unwrap_or_else(now_ms);
        match inner.pool.apply_operation(
            &message.object_id,
            &message.operation,
            site,
            message.serial.as_ref(),
            now,
        ) {
            Ok(Some(update)) => {
                self.notify(inner, &message.object_id, update);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error @ ObjectError::TypeMismatch { .. }) => {
                // One malformed message never aborts convergence for the
                // rest of the graph.
                warn!(%error, "dropping mistyped operation");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Fan an object's diff out to every root path it is reachable at.
    /// Map changes are addressed per affected key; counter changes at
    /// the object's own paths.
    fn notify(&self, inner: &EngineInner, id: &ObjectId, update: ObjectUpdate) {
        let paths = inner.pool.paths_of(id);
        for path in &paths {
            match &update {
                ObjectUpdate::Map { updated, removed } => {
                    for key in updated.iter().chain(removed.iter()) {
                        let mut event_path = path.clone();
                        event_path.push(key.clone());
                        self.router.publish(&ChangeEvent {
                            path: event_path,
                            object_id: id.clone(),
                            update: update.clone(),
                            bubbles: true,
                        });
                    }
                }
                ObjectUpdate::Counter { .. } => {
                    self.router.publish(&ChangeEvent {
                        path: path.clone(),
                        object_id: id.clone(),
                        update: update.clone(),
                        bubbles: true,
                    });
                }
            }
        }
    }

    fn ensure_channel_usable(&self) -> Result<()> {
        let state = self.channel.state();
        if state.is_usable() {
            Ok(())
        } else {
            Err(self.channel_unusable(state))
        }
    }

    fn channel_unusable(&self, state: ChannelState) -> SyncError {
        SyncError::ChannelUnusable {
            state,
            cause: self.channel.error_info(),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    fn engine() -> SyncEngine<MemoryChannel> {
        SyncEngine::new(Arc::new(MemoryChannel::new("local")))
    }

    #[test]
    fn test_phase_transitions_on_attach() {
        let engine = engine();
        assert_eq!(engine.phase(), SyncPhase::Uninitialized);
        engine.handle_attached(true);
        assert_eq!(engine.phase(), SyncPhase::Syncing);
        engine.handle_attached(false);
        assert_eq!(engine.phase(), SyncPhase::Synced);
    }

    #[test]
    fn test_wait_until_synced_resolves_when_already_synced() {
        let engine = engine();
        engine.handle_attached(false);
        tokio_test::block_on(engine.wait_until_synced()).unwrap();
    }

    #[test]
    fn test_oversized_publish_is_rejected() {
        let engine = engine();
        engine.handle_attached(false);

        let huge = write::map_set(&ObjectId::root(), "k", "x".repeat(128 * 1024).into());
        let err =
            tokio_test::block_on(engine.publish_and_apply_locally(vec![huge])).unwrap_err();
        assert!(matches!(err, SyncError::MessageTooLarge { .. }));
        assert!(engine.channel().published().is_empty());
    }
}
