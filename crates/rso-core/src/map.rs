//! Last-writer-wins map data.
//!
//! Each key resolves independently: an incoming SET or REMOVE is ignored
//! unless its timeserial is strictly greater than the one stored on the
//! existing entry. Removed entries are tombstoned, not deleted - the key is
//! retained until the GC grace period elapses so a lagging replica cannot
//! revive state the rest of the cluster has already forgotten.

use crate::objectid::ObjectId;
use crate::timeserial::Timeserial;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// One key's conflict-resolution state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub tombstone: bool,
    pub tombstoned_at: Option<u64>,
    pub serial: Option<Timeserial>,
    pub value: Option<Value>,
}

impl MapEntry {
    pub fn live(value: Value, serial: Option<Timeserial>) -> Self {
        Self {
            tombstone: false,
            tombstoned_at: None,
            serial,
            value: Some(value),
        }
    }

    pub fn tombstoned(serial: Option<Timeserial>, at: u64) -> Self {
        Self {
            tombstone: true,
            tombstoned_at: Some(at),
            serial,
            value: None,
        }
    }

    /// Whether the entry itself exposes a value. Liveness of a referenced
    /// target is the pool's concern, not the entry's.
    pub fn is_visible(&self) -> bool {
        !self.tombstone && self.value.is_some()
    }

    fn reference(&self) -> Option<&ObjectId> {
        self.value.as_ref().and_then(|v| v.as_reference())
    }
}

/// Outcome of a single-entry merge.
#[derive(Debug, Default, PartialEq)]
pub struct EntryMergeOutcome {
    pub applied: bool,
    /// Reference edge the caller must add to the parent graph.
    pub ref_added: Option<ObjectId>,
    /// Reference edge the caller must drop from the parent graph.
    pub ref_removed: Option<ObjectId>,
}

/// Outcome of merging a whole create payload.
#[derive(Debug, Default)]
pub struct CreateMergeOutcome {
    pub updated: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub refs_added: Vec<(String, ObjectId)>,
    pub refs_removed: Vec<(String, ObjectId)>,
}

/// The typed data of a map object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    entries: BTreeMap<String, MapEntry>,
}

impl MapData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, MapEntry>) -> Self {
        Self { entries }
    }

    pub fn entry(&self, key: &str) -> Option<&MapEntry> {
        self.entries.get(key)
    }

    /// All entries, tombstoned ones included.
    pub fn entries(&self) -> &BTreeMap<String, MapEntry> {
        &self.entries
    }

    /// Keys with a visible value.
    pub fn live_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_visible())
            .map(|(k, _)| k.as_str())
    }

    /// `(key, target)` pairs for every visible reference-valued entry.
    pub fn outgoing_refs(&self) -> Vec<(String, ObjectId)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_visible())
            .filter_map(|(k, e)| e.reference().map(|id| (k.clone(), id.clone())))
            .collect()
    }

    /// Visible key -> value view, used for snapshot-override diffing.
    pub fn visible(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_visible())
            .filter_map(|(k, e)| e.value.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    /// LWW gate: may `incoming` replace the entry currently at `key`?
    ///
    /// An existing entry whose serial is not less than the incoming one
    /// wins; an absent entry always loses to any write.
    fn can_update(&self, key: &str, incoming: Option<&Timeserial>) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(existing) => {
                Timeserial::compare_optional(existing.serial.as_ref(), incoming) == Ordering::Less
            }
        }
    }

    /// Merge a SET for `key`. Returns the edges the caller must reconcile.
    pub fn apply_set(
        &mut self,
        key: &str,
        value: Value,
        serial: Option<Timeserial>,
    ) -> EntryMergeOutcome {
        if !self.can_update(key, serial.as_ref()) {
            return EntryMergeOutcome::default();
        }
        let ref_removed = self
            .entries
            .get(key)
            .and_then(|old| old.reference().cloned());
        let ref_added = value.as_reference().cloned();
        self.entries
            .insert(key.to_string(), MapEntry::live(value, serial));
        EntryMergeOutcome {
            applied: true,
            ref_added,
            ref_removed,
        }
    }

    /// Merge a REMOVE for `key`. The entry is tombstoned in place and the
    /// key retained pending GC.
    pub fn apply_remove(
        &mut self,
        key: &str,
        serial: Option<Timeserial>,
        at: u64,
    ) -> EntryMergeOutcome {
        if !self.can_update(key, serial.as_ref()) {
            return EntryMergeOutcome::default();
        }
        let ref_removed = self
            .entries
            .get(key)
            .and_then(|old| old.reference().cloned());
        self.entries
            .insert(key.to_string(), MapEntry::tombstoned(serial, at));
        EntryMergeOutcome {
            applied: true,
            ref_added: None,
            ref_removed,
        }
    }

    /// Merge a create payload's entries, each through the normal per-key
    /// gate. This lets an existing object absorb a late-arriving create
    /// without double-counting anything already merged.
    pub fn merge_create(
        &mut self,
        payload: &BTreeMap<String, MapEntry>,
        now: u64,
    ) -> CreateMergeOutcome {
        let mut outcome = CreateMergeOutcome::default();
        for (key, entry) in payload {
            if entry.tombstone {
                let at = entry.tombstoned_at.unwrap_or(now);
                let merged = self.apply_remove(key, entry.serial.clone(), at);
                if merged.applied {
                    outcome.removed.insert(key.clone());
                    if let Some(id) = merged.ref_removed {
                        outcome.refs_removed.push((key.clone(), id));
                    }
                }
            } else if let Some(value) = entry.value.clone() {
                let merged = self.apply_set(key, value, entry.serial.clone());
                if merged.applied {
                    outcome.updated.insert(key.clone());
                    if let Some(id) = merged.ref_added {
                        outcome.refs_added.push((key.clone(), id));
                    }
                    if let Some(id) = merged.ref_removed {
                        outcome.refs_removed.push((key.clone(), id));
                    }
                }
            }
        }
        outcome
    }

    /// Drop tombstoned entries older than the grace period. Removed data
    /// was already invisible, so sweeping is never observable.
    pub fn gc_sweep(&mut self, now: u64, grace_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            !(e.tombstone && e.tombstoned_at.map_or(true, |at| now.saturating_sub(at) >= grace_ms))
        });
        before - self.entries.len()
    }
}
