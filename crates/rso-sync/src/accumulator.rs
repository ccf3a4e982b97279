//! Snapshot accumulator: merges paginated full-state sync payloads into
//! per-object snapshots until the sequence's final page arrives.
//!
//! Pages of one sequence may split a map's entries across messages (key
//! sets are disjoint by construction), but a counter's payload must be
//! whole. State from a stale sequence is never mixed with a new one.

use rso_core::{ObjectId, ObjectState};
use std::collections::HashMap;
use tracing::warn;

/// Accumulated state for one in-flight sync sequence.
#[derive(Debug, Default)]
pub struct SnapshotAccumulator {
    sequence_id: Option<String>,
    entries: HashMap<ObjectId, ObjectState>,
}

impl SnapshotAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence_id(&self) -> Option<&str> {
        self.sequence_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track a sequence id, discarding any prior accumulation made under
    /// a different one. Re-announcing the current sequence is a no-op.
    pub fn begin_sequence(&mut self, sequence_id: &str) {
        if self.sequence_id.as_deref() != Some(sequence_id) {
            self.entries.clear();
            self.sequence_id = Some(sequence_id.to_string());
        }
    }

    /// Ingest one per-object payload from the current sequence.
    pub fn ingest(&mut self, state: ObjectState) {
        if !state.has_payload() {
            warn!(object_id = %state.object_id, "dropping snapshot payload with no typed data");
            return;
        }

        // Tombstone dominates whatever partial state was accumulated.
        if state.tombstone {
            self.entries.insert(state.object_id.clone(), state);
            return;
        }

        if !self.entries.contains_key(&state.object_id) {
            self.entries.insert(state.object_id.clone(), state);
            return;
        }

        if let Some(existing) = self.entries.get_mut(&state.object_id) {
            if existing.tombstone {
                // Already tombstoned within this sequence; nothing a
                // later partial payload says can matter.
                return;
            }
            if existing.counter_count.is_some() && state.counter_count.is_some() {
                // Counter payloads never split across pages; a second
                // one for the same id is a protocol error. Drop it
                // without failing the sequence.
                warn!(
                    object_id = %state.object_id,
                    "dropping split counter payload within one sync sequence"
                );
                return;
            }
            if let Some(incoming) = state.map_entries {
                existing
                    .map_entries
                    .get_or_insert_with(Default::default)
                    .extend(incoming);
            }
            if existing.counter_count.is_none() {
                existing.counter_count = state.counter_count;
            }
            if existing.create_op.is_none() {
                existing.create_op = state.create_op;
            }
            existing.site_timeserials.extend(state.site_timeserials);
        }
    }

    /// Drain the accumulation for commit and forget the sequence.
    pub fn take(&mut self) -> Vec<ObjectState> {
        self.sequence_id = None;
        self.entries.drain().map(|(_, state)| state).collect()
    }

    /// Drop everything, sequence id included.
    pub fn reset(&mut self) {
        self.sequence_id = None;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rso_core::map::MapEntry;
    use rso_core::{ObjectType, Timeserial};
    use std::collections::BTreeMap;

    fn map_state(id: &ObjectId, keys: &[(&str, i64)]) -> ObjectState {
        let mut state = ObjectState::new(id.clone());
        let mut entries = BTreeMap::new();
        for (i, (key, value)) in keys.iter().enumerate() {
            entries.insert(
                key.to_string(),
                MapEntry::live((*value).into(), Some(Timeserial::new("s", i as u64 + 1, 0))),
            );
        }
        state.map_entries = Some(entries);
        state
    }

    #[test]
    fn test_map_pages_union_by_key() {
        let id = ObjectId::generate(ObjectType::Map, b"m", b"n", 1);
        let mut acc = SnapshotAccumulator::new();
        acc.begin_sequence("s1");
        acc.ingest(map_state(&id, &[("a", 1)]));
        acc.ingest(map_state(&id, &[("b", 2)]));

        let states = acc.take();
        assert_eq!(states.len(), 1);
        let entries = states[0].map_entries.as_ref().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("a") && entries.contains_key("b"));
    }

    #[test]
    fn test_new_sequence_discards_accumulation() {
        let id = ObjectId::generate(ObjectType::Map, b"m", b"n", 1);
        let mut acc = SnapshotAccumulator::new();
        acc.begin_sequence("s1");
        acc.ingest(map_state(&id, &[("a", 1)]));

        acc.begin_sequence("s2");
        assert!(acc.is_empty());
        assert_eq!(acc.sequence_id(), Some("s2"));

        // Re-announcing the current sequence keeps everything.
        acc.ingest(map_state(&id, &[("b", 2)]));
        acc.begin_sequence("s2");
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_split_counter_payload_is_dropped() {
        let id = ObjectId::generate(ObjectType::Counter, b"c", b"n", 1);
        let mut acc = SnapshotAccumulator::new();
        acc.begin_sequence("s1");

        let mut first = ObjectState::new(id.clone());
        first.counter_count = Some(5.0);
        acc.ingest(first);

        let mut second = ObjectState::new(id.clone());
        second.counter_count = Some(100.0);
        acc.ingest(second);

        let states = acc.take();
        assert_eq!(states[0].counter_count, Some(5.0));
    }

    #[test]
    fn test_tombstone_replaces_partial_accumulation() {
        let id = ObjectId::generate(ObjectType::Map, b"m", b"n", 1);
        let mut acc = SnapshotAccumulator::new();
        acc.begin_sequence("s1");
        acc.ingest(map_state(&id, &[("a", 1)]));

        let mut tombstoned = ObjectState::new(id.clone());
        tombstoned.tombstone = true;
        acc.ingest(tombstoned);

        // A later partial page cannot resurrect the entry.
        acc.ingest(map_state(&id, &[("b", 2)]));

        let states = acc.take();
        assert!(states[0].tombstone);
        assert!(states[0].map_entries.is_none());
    }

    #[test]
    fn test_payloadless_state_is_dropped() {
        let id = ObjectId::generate(ObjectType::Map, b"m", b"n", 1);
        let mut acc = SnapshotAccumulator::new();
        acc.begin_sequence("s1");
        acc.ingest(ObjectState::new(id));
        assert!(acc.is_empty());
    }
}
