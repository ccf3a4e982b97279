//! The live-object base: per-site application gating, tombstone lifecycle
//! and dispatch into the typed merge logic.
//!
//! Every object records, per originating site, the most recent timeserial
//! that site has contributed. An operation whose serial is not strictly
//! greater than the stored one for its site is a no-op - that single rule
//! is what makes application idempotent and tolerant of arbitrary
//! reordering. Tombstoning is one-way: once set, no later operation
//! changes the object's externally visible state.

use crate::counter::CounterData;
use crate::error::{ObjectError, Result};
use crate::map::MapData;
use crate::objectid::{ObjectId, ObjectType};
use crate::op::{ObjectOperation, ObjectState};
use crate::timeserial::Timeserial;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Typed data, one variant per supported collection kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObjectData {
    Map(MapData),
    Counter(CounterData),
}

impl ObjectData {
    fn zero_value(object_type: ObjectType) -> Self {
        match object_type {
            ObjectType::Map => ObjectData::Map(MapData::new()),
            ObjectType::Counter => ObjectData::Counter(CounterData::new()),
        }
    }
}

/// The externally visible change produced by a merge.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectUpdate {
    Map {
        updated: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
    Counter {
        amount: f64,
    },
}

impl ObjectUpdate {
    pub fn is_empty(&self) -> bool {
        match self {
            ObjectUpdate::Map { updated, removed } => updated.is_empty() && removed.is_empty(),
            ObjectUpdate::Counter { amount } => *amount == 0.0,
        }
    }
}

/// What a merge did: the visible diff plus the reference edges the pool
/// must reconcile in the parent graph.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub update: Option<ObjectUpdate>,
    pub refs_added: Vec<(String, ObjectId)>,
    pub refs_removed: Vec<(String, ObjectId)>,
}

impl ApplyOutcome {
    fn noop() -> Self {
        Self::default()
    }
}

/// A live replicated object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveObject {
    id: ObjectId,
    tombstone: bool,
    tombstoned_at: Option<u64>,
    create_merged: bool,
    site_timeserials: HashMap<String, Timeserial>,
    data: ObjectData,
}

impl LiveObject {
    /// Materialize a zero-value placeholder for `id`, typed by the id
    /// itself. Used when something references an object whose own create
    /// data has not arrived yet.
    pub fn zero_value(id: ObjectId) -> Self {
        let data = ObjectData::zero_value(id.object_type());
        Self {
            id,
            tombstone: false,
            tombstoned_at: None,
            create_merged: false,
            site_timeserials: HashMap::new(),
            data,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.id.object_type()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstone
    }

    pub fn tombstoned_at(&self) -> Option<u64> {
        self.tombstoned_at
    }

    pub fn create_merged(&self) -> bool {
        self.create_merged
    }

    pub fn site_timeserials(&self) -> &HashMap<String, Timeserial> {
        &self.site_timeserials
    }

    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    pub fn map_data(&self) -> Option<&MapData> {
        match &self.data {
            ObjectData::Map(m) => Some(m),
            ObjectData::Counter(_) => None,
        }
    }

    pub(crate) fn map_data_mut(&mut self) -> Option<&mut MapData> {
        match &mut self.data {
            ObjectData::Map(m) => Some(m),
            ObjectData::Counter(_) => None,
        }
    }

    pub fn counter_data(&self) -> Option<&CounterData> {
        match &self.data {
            ObjectData::Counter(c) => Some(c),
            ObjectData::Map(_) => None,
        }
    }

    /// Reference edges this object currently holds as a parent.
    pub fn outgoing_refs(&self) -> Vec<(String, ObjectId)> {
        match &self.data {
            ObjectData::Map(m) => m.outgoing_refs(),
            ObjectData::Counter(_) => Vec::new(),
        }
    }

    /// Per-site gate: true iff `candidate` is strictly greater than the
    /// serial stored for `site`. An absent stored serial loses to any
    /// present candidate; two absents never permit application.
    pub fn can_apply(&self, site: &str, candidate: Option<&Timeserial>) -> bool {
        let stored = self.site_timeserials.get(site);
        Timeserial::compare_optional(candidate, stored) == Ordering::Greater
    }

    /// Merge one operation.
    ///
    /// A gated or tombstone-suppressed operation is handled as a no-op,
    /// not an error. When the gate admits the operation, the site serial
    /// is recorded immediately - even if the typed merge below turns out
    /// to be structurally empty (e.g. a duplicate create) - so the same
    /// serial can never be applied twice.
    pub fn apply_operation(
        &mut self,
        op: &ObjectOperation,
        site: &str,
        serial: Option<&Timeserial>,
        now: u64,
    ) -> Result<ApplyOutcome> {
        if !self.can_apply(site, serial) {
            return Ok(ApplyOutcome::noop());
        }
        if self.tombstone {
            return Ok(ApplyOutcome::noop());
        }
        if let Some(serial) = serial {
            self.site_timeserials
                .insert(site.to_string(), serial.clone());
        }
        self.merge(op, serial, now)
    }

    fn merge(
        &mut self,
        op: &ObjectOperation,
        serial: Option<&Timeserial>,
        now: u64,
    ) -> Result<ApplyOutcome> {
        if matches!(op, ObjectOperation::ObjectDelete) {
            return Ok(self.tombstone_object(now));
        }

        let mismatch = || ObjectError::TypeMismatch {
            id: self.id.to_string(),
            action: op.action().to_string(),
        };

        match (op, &mut self.data) {
            (ObjectOperation::MapCreate { entries }, ObjectData::Map(map)) => {
                if self.create_merged {
                    return Ok(ApplyOutcome::noop());
                }
                let merged = map.merge_create(entries, now);
                self.create_merged = true;
                let update = ObjectUpdate::Map {
                    updated: merged.updated,
                    removed: merged.removed,
                };
                Ok(ApplyOutcome {
                    update: (!update.is_empty()).then_some(update),
                    refs_added: merged.refs_added,
                    refs_removed: merged.refs_removed,
                })
            }
            (ObjectOperation::MapSet { key, value }, ObjectData::Map(map)) => {
                let merged = map.apply_set(key, value.clone(), serial.cloned());
                if !merged.applied {
                    return Ok(ApplyOutcome::noop());
                }
                Ok(ApplyOutcome {
                    update: Some(ObjectUpdate::Map {
                        updated: BTreeSet::from([key.clone()]),
                        removed: BTreeSet::new(),
                    }),
                    refs_added: merged
                        .ref_added
                        .into_iter()
                        .map(|id| (key.clone(), id))
                        .collect(),
                    refs_removed: merged
                        .ref_removed
                        .into_iter()
                        .map(|id| (key.clone(), id))
                        .collect(),
                })
            }
            (ObjectOperation::MapRemove { key }, ObjectData::Map(map)) => {
                let merged = map.apply_remove(key, serial.cloned(), now);
                if !merged.applied {
                    return Ok(ApplyOutcome::noop());
                }
                Ok(ApplyOutcome {
                    update: Some(ObjectUpdate::Map {
                        updated: BTreeSet::new(),
                        removed: BTreeSet::from([key.clone()]),
                    }),
                    refs_added: Vec::new(),
                    refs_removed: merged
                        .ref_removed
                        .into_iter()
                        .map(|id| (key.clone(), id))
                        .collect(),
                })
            }
            (ObjectOperation::CounterCreate { count }, ObjectData::Counter(counter)) => {
                // Guarded by the create-merged flag, not the serial gate:
                // the creation payload has no independent timeserial in
                // all cases.
                if self.create_merged {
                    return Ok(ApplyOutcome::noop());
                }
                self.create_merged = true;
                let amount = counter.increment(count.unwrap_or(0.0));
                let update = ObjectUpdate::Counter { amount };
                Ok(ApplyOutcome {
                    update: (!update.is_empty()).then_some(update),
                    ..ApplyOutcome::default()
                })
            }
            (ObjectOperation::CounterInc { amount }, ObjectData::Counter(counter)) => {
                let amount = counter.increment(*amount);
                Ok(ApplyOutcome {
                    update: Some(ObjectUpdate::Counter { amount }),
                    ..ApplyOutcome::default()
                })
            }
            _ => Err(mismatch()),
        }
    }

    /// Terminal transition: clear typed data and report every reference
    /// edge this object held as a parent, so the pool can drop them.
    pub fn tombstone_object(&mut self, at: u64) -> ApplyOutcome {
        let refs_removed = self.outgoing_refs();
        let update = match &self.data {
            ObjectData::Map(map) => ObjectUpdate::Map {
                updated: BTreeSet::new(),
                removed: map.visible().into_keys().collect(),
            },
            ObjectData::Counter(counter) => ObjectUpdate::Counter {
                amount: -counter.count(),
            },
        };
        self.tombstone = true;
        self.tombstoned_at = Some(at);
        self.data = ObjectData::zero_value(self.id.object_type());
        ApplyOutcome {
            update: (!update.is_empty()).then_some(update),
            refs_added: Vec::new(),
            refs_removed,
        }
    }

    /// Wholesale replace from a snapshot payload, returning the diff
    /// versus the pre-override state.
    pub fn override_with_state(&mut self, state: &ObjectState, now: u64) -> Result<ApplyOutcome> {
        if state.object_id != self.id {
            return Err(ObjectError::ObjectIdMismatch {
                operation: state.object_id.to_string(),
                target: self.id.to_string(),
            });
        }

        self.site_timeserials = state.site_timeserials.clone();

        if state.tombstone {
            return Ok(self.tombstone_object(state.tombstoned_at.unwrap_or(now)));
        }

        match self.id.object_type() {
            ObjectType::Map => {
                let old = self
                    .map_data()
                    .map(|m| m.visible())
                    .unwrap_or_default();
                let mut map = MapData::from_entries(state.map_entries.clone().unwrap_or_default());
                let mut refs_added = Vec::new();
                let mut refs_removed = Vec::new();
                if let Some(ObjectOperation::MapCreate { entries }) = &state.create_op {
                    if !self.create_merged {
                        let merged = map.merge_create(entries, now);
                        refs_added = merged.refs_added;
                        refs_removed = merged.refs_removed;
                        self.create_merged = true;
                    }
                } else if state.create_op.is_some() {
                    return Err(ObjectError::TypeMismatch {
                        id: self.id.to_string(),
                        action: "MAP_OVERRIDE".to_string(),
                    });
                }
                let new = map.visible();
                let mut updated = BTreeSet::new();
                let mut removed = BTreeSet::new();
                for (key, value) in &new {
                    if old.get(key) != Some(value) {
                        updated.insert(key.clone());
                    }
                }
                for key in old.keys() {
                    if !new.contains_key(key) {
                        removed.insert(key.clone());
                    }
                }
                self.data = ObjectData::Map(map);
                let update = ObjectUpdate::Map { updated, removed };
                Ok(ApplyOutcome {
                    update: (!update.is_empty()).then_some(update),
                    refs_added,
                    refs_removed,
                })
            }
            ObjectType::Counter => {
                let old = self.counter_data().map(|c| c.count()).unwrap_or(0.0);
                let mut counter = CounterData::from_count(state.counter_count.unwrap_or(0.0));
                match &state.create_op {
                    Some(ObjectOperation::CounterCreate { count }) => {
                        if !self.create_merged {
                            counter.increment(count.unwrap_or(0.0));
                            self.create_merged = true;
                        }
                    }
                    Some(_) => {
                        return Err(ObjectError::TypeMismatch {
                            id: self.id.to_string(),
                            action: "COUNTER_OVERRIDE".to_string(),
                        })
                    }
                    None => {}
                }
                let amount = counter.count() - old;
                self.data = ObjectData::Counter(counter);
                let update = ObjectUpdate::Counter { amount };
                Ok(ApplyOutcome {
                    update: (!update.is_empty()).then_some(update),
                    ..ApplyOutcome::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(timestamp: u64) -> Option<Timeserial> {
        Some(Timeserial::new("site1", timestamp, 0))
    }

    fn map_id() -> ObjectId {
        ObjectId::generate(ObjectType::Map, b"{}", b"n", 1)
    }

    fn counter_id() -> ObjectId {
        ObjectId::generate(ObjectType::Counter, b"0", b"n", 1)
    }

    fn set_op(key: &str, value: &str) -> ObjectOperation {
        ObjectOperation::MapSet {
            key: key.to_string(),
            value: value.into(),
        }
    }

    #[test]
    fn test_can_apply_requires_strictly_greater() {
        let mut obj = LiveObject::zero_value(map_id());
        assert!(obj.can_apply("site1", ts(5).as_ref()));

        obj.apply_operation(&set_op("k", "v"), "site1", ts(5).as_ref(), 0)
            .unwrap();
        assert!(!obj.can_apply("site1", ts(5).as_ref()));
        assert!(!obj.can_apply("site1", ts(4).as_ref()));
        assert!(obj.can_apply("site1", ts(6).as_ref()));
        // Other sites are gated independently.
        assert!(obj.can_apply("site2", ts(1).as_ref()));
        // Two absent serials never permit application.
        assert!(!obj.can_apply("site3", None));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut a = LiveObject::zero_value(map_id());
        let mut b = LiveObject::zero_value(map_id());
        let op = set_op("k", "v");

        a.apply_operation(&op, "site1", ts(1).as_ref(), 0).unwrap();
        b.apply_operation(&op, "site1", ts(1).as_ref(), 0).unwrap();
        b.apply_operation(&op, "site1", ts(1).as_ref(), 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serial_recorded_even_for_duplicate_create() {
        let mut obj = LiveObject::zero_value(map_id());
        let create = ObjectOperation::MapCreate {
            entries: Default::default(),
        };
        obj.apply_operation(&create, "site1", ts(1).as_ref(), 0)
            .unwrap();
        assert!(obj.create_merged());

        // Second create merges nothing, but its serial still lands.
        let out = obj
            .apply_operation(&create, "site1", ts(2).as_ref(), 0)
            .unwrap();
        assert!(out.update.is_none());
        assert_eq!(
            obj.site_timeserials().get("site1"),
            ts(2).as_ref()
        );
    }

    #[test]
    fn test_tombstone_is_terminal() {
        let mut obj = LiveObject::zero_value(map_id());
        obj.apply_operation(&set_op("k", "v"), "site1", ts(1).as_ref(), 0)
            .unwrap();
        obj.apply_operation(&ObjectOperation::ObjectDelete, "site1", ts(2).as_ref(), 100)
            .unwrap();
        assert!(obj.is_tombstoned());
        assert_eq!(obj.tombstoned_at(), Some(100));

        // A later SET with a larger serial changes nothing.
        let out = obj
            .apply_operation(&set_op("k", "revived"), "site1", ts(9).as_ref(), 0)
            .unwrap();
        assert!(out.update.is_none());
        assert_eq!(obj.map_data().unwrap().live_keys().count(), 0);
    }

    #[test]
    fn test_counter_create_merges_once() {
        let mut obj = LiveObject::zero_value(counter_id());
        let create = ObjectOperation::CounterCreate { count: Some(5.0) };

        obj.apply_operation(&create, "site1", ts(1).as_ref(), 0)
            .unwrap();
        obj.apply_operation(&create, "site2", ts(1).as_ref(), 0)
            .unwrap();
        assert_eq!(obj.counter_data().unwrap().count(), 5.0);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mut obj = LiveObject::zero_value(counter_id());
        let err = obj
            .apply_operation(&set_op("k", "v"), "site1", ts(1).as_ref(), 0)
            .unwrap_err();
        assert!(matches!(err, ObjectError::TypeMismatch { .. }));
    }

    #[test]
    fn test_override_with_state_produces_diff() {
        let mut obj = LiveObject::zero_value(map_id());
        obj.apply_operation(&set_op("stale", "x"), "site1", ts(1).as_ref(), 0)
            .unwrap();
        obj.apply_operation(&set_op("kept", "same"), "site1", ts(2).as_ref(), 0)
            .unwrap();

        let mut state = ObjectState::new(obj.id().clone());
        let mut entries = std::collections::BTreeMap::new();
        entries.insert(
            "kept".to_string(),
            crate::map::MapEntry::live("same".into(), ts(2)),
        );
        entries.insert(
            "fresh".to_string(),
            crate::map::MapEntry::live("new".into(), ts(3)),
        );
        state.map_entries = Some(entries);

        let out = obj.override_with_state(&state, 0).unwrap();
        match out.update.unwrap() {
            ObjectUpdate::Map { updated, removed } => {
                assert!(updated.contains("fresh"));
                assert!(!updated.contains("kept"));
                assert!(removed.contains("stale"));
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn test_override_with_tombstoned_state() {
        let mut obj = LiveObject::zero_value(counter_id());
        obj.apply_operation(
            &ObjectOperation::CounterInc { amount: 7.0 },
            "site1",
            ts(1).as_ref(),
            0,
        )
        .unwrap();

        let mut state = ObjectState::new(obj.id().clone());
        state.tombstone = true;
        state.tombstoned_at = Some(42);

        let out = obj.override_with_state(&state, 0).unwrap();
        assert!(obj.is_tombstoned());
        assert_eq!(obj.tombstoned_at(), Some(42));
        assert_eq!(out.update, Some(ObjectUpdate::Counter { amount: -7.0 }));
    }

    #[test]
    fn test_override_merges_unmerged_create_op() {
        let mut obj = LiveObject::zero_value(counter_id());

        let mut state = ObjectState::new(obj.id().clone());
        state.counter_count = Some(3.0);
        state.create_op = Some(ObjectOperation::CounterCreate { count: Some(5.0) });

        obj.override_with_state(&state, 0).unwrap();
        assert!(obj.create_merged());
        assert_eq!(obj.counter_data().unwrap().count(), 8.0);

        // A second override with the same payload does not double-merge
        // the create data.
        obj.override_with_state(&state, 0).unwrap();
        assert_eq!(obj.counter_data().unwrap().count(), 8.0);
    }

    #[test]
    fn test_override_rejects_foreign_id() {
        let mut obj = LiveObject::zero_value(map_id());
        let state = ObjectState::new(counter_id());
        let err = obj.override_with_state(&state, 0).unwrap_err();
        assert!(matches!(err, ObjectError::ObjectIdMismatch { .. }));
    }
}
