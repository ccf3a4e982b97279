//! The object pool: the arena of live objects keyed by id, plus the
//! rebuildable parent-reference index that keeps the graph cycle-safe.
//!
//! Cross-object references are id-valued lookups, never owning pointers.
//! For each object the pool records which `(parent map, key)` pairs
//! currently point at it; the index is maintained incrementally on every
//! map mutation and rebuilt wholesale after every snapshot commit, since a
//! snapshot can change identities the incremental bookkeeping never saw.

use crate::error::{ObjectError, Result};
use crate::object::{LiveObject, ObjectData, ObjectUpdate};
use crate::objectid::ObjectId;
use crate::op::{ObjectOperation, ObjectState};
use crate::timeserial::Timeserial;
use crate::value::{Primitive, Value};
use serde_json::json;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

/// One incoming edge of the parent-reference graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub parent_id: ObjectId,
    pub key: String,
}

/// Shared mutable map node produced by [`ObjectPool::compact`].
pub type CompactMap = Rc<RefCell<BTreeMap<String, CompactValue>>>;

/// In-memory export of an object subgraph.
///
/// A reference back to an already-visited ancestor yields a clone of the
/// same shared map node, which is what makes cyclic graphs exportable
/// without unbounded recursion.
#[derive(Clone, Debug)]
pub enum CompactValue {
    Map(CompactMap),
    Counter(f64),
    Primitive(Primitive),
}

impl CompactValue {
    pub fn as_map(&self) -> Option<&CompactMap> {
        match self {
            CompactValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<f64> {
        match self {
            CompactValue::Counter(c) => Some(*c),
            _ => None,
        }
    }
}

/// The pool of live replicated objects for one channel.
#[derive(Debug, Default)]
pub struct ObjectPool {
    objects: HashMap<ObjectId, LiveObject>,
    parents: HashMap<ObjectId, HashSet<ParentRef>>,
}

impl ObjectPool {
    /// A fresh pool containing only the root map.
    pub fn new() -> Self {
        let mut pool = Self {
            objects: HashMap::new(),
            parents: HashMap::new(),
        };
        pool.objects
            .insert(ObjectId::root(), LiveObject::zero_value(ObjectId::root()));
        pool
    }

    pub fn get(&self, id: &ObjectId) -> Option<&LiveObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    /// Incoming parent edges recorded for `id`.
    pub fn parents_of(&self, id: &ObjectId) -> impl Iterator<Item = &ParentRef> {
        self.parents.get(id).into_iter().flatten()
    }

    /// Materialize a zero-value placeholder if `id` is absent. Idempotent.
    ///
    /// The placeholder's type is inferred from the id itself, so a
    /// dependent read never has to special-case a missing target.
    pub fn ensure_exists(&mut self, id: &ObjectId) {
        self.objects
            .entry(id.clone())
            .or_insert_with(|| LiveObject::zero_value(id.clone()));
    }

    /// Drop every pool member absent from a just-committed full snapshot.
    /// The root is structural and never evicted.
    pub fn evict_ids_not_in(&mut self, received: &HashSet<ObjectId>) -> Vec<ObjectId> {
        let evicted: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|id| !id.is_root() && !received.contains(*id))
            .cloned()
            .collect();
        for id in &evicted {
            self.objects.remove(id);
            self.parents.remove(id);
        }
        evicted
    }

    /// Throw away everything and start over with just the root. Used for
    /// the empty commit on attach-without-objects.
    pub fn reset_to_root(&mut self) {
        self.objects.clear();
        self.parents.clear();
        self.objects
            .insert(ObjectId::root(), LiveObject::zero_value(ObjectId::root()));
    }

    /// Clear and recompute the whole parent-reference index with one scan
    /// over every map's current entries. Invoked once per snapshot commit.
    pub fn rebuild_parent_references(&mut self) {
        self.parents.clear();
        let mut edges: Vec<(ObjectId, ParentRef)> = Vec::new();
        for (id, object) in &self.objects {
            for (key, target) in object.outgoing_refs() {
                edges.push((
                    target,
                    ParentRef {
                        parent_id: id.clone(),
                        key,
                    },
                ));
            }
        }
        for (target, edge) in edges {
            self.ensure_exists(&target);
            self.parents.entry(target).or_default().insert(edge);
        }
    }

    /// Merge one operation into its target object and reconcile the
    /// parent graph with whatever edges the merge added or dropped.
    pub fn apply_operation(
        &mut self,
        target: &ObjectId,
        op: &ObjectOperation,
        site: &str,
        serial: Option<&Timeserial>,
        now: u64,
    ) -> Result<Option<ObjectUpdate>> {
        let object = self
            .objects
            .get_mut(target)
            .ok_or_else(|| ObjectError::NotFound(target.to_string()))?;
        if object.id() != target {
            // A pool entry stored under a key other than its own id is a
            // dispatch bug, never a recoverable runtime condition.
            return Err(ObjectError::ObjectIdMismatch {
                operation: object.id().to_string(),
                target: target.to_string(),
            });
        }

        let outcome = object.apply_operation(op, site, serial, now)?;
        for (key, removed) in &outcome.refs_removed {
            self.remove_parent_ref(removed, target, key);
        }
        for (key, added) in &outcome.refs_added {
            self.ensure_exists(added);
            self.add_parent_ref(added, target, key);
        }
        Ok(outcome.update)
    }

    /// Install a snapshot entry: a full-state override for a known id, a
    /// brand-new typed instance for an unseen one. Either way the returned
    /// diff is relative to what was visible before.
    ///
    /// Edges are not reconciled here; the committing caller rebuilds the
    /// whole index afterwards.
    pub fn apply_state(&mut self, state: &ObjectState, now: u64) -> Result<Option<ObjectUpdate>> {
        if let Some(object) = self.objects.get_mut(&state.object_id) {
            let outcome = object.override_with_state(state, now)?;
            return Ok(outcome.update);
        }
        let mut object = LiveObject::zero_value(state.object_id.clone());
        let outcome = object.override_with_state(state, now)?;
        self.objects.insert(state.object_id.clone(), object);
        Ok(outcome.update)
    }

    fn add_parent_ref(&mut self, target: &ObjectId, parent: &ObjectId, key: &str) {
        self.parents.entry(target.clone()).or_default().insert(ParentRef {
            parent_id: parent.clone(),
            key: key.to_string(),
        });
    }

    fn remove_parent_ref(&mut self, target: &ObjectId, parent: &ObjectId, key: &str) {
        if let Some(refs) = self.parents.get_mut(target) {
            refs.remove(&ParentRef {
                parent_id: parent.clone(),
                key: key.to_string(),
            });
            if refs.is_empty() {
                self.parents.remove(target);
            }
        }
    }

    /// Every root path of `id`, walking the parent graph upward. A cyclic
    /// branch dead-ends instead of recursing forever; an unreachable
    /// object yields no paths.
    pub fn paths_of(&self, id: &ObjectId) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut suffix = Vec::new();
        let mut visiting = HashSet::new();
        self.collect_paths(id, &mut suffix, &mut visiting, &mut paths);
        paths.sort();
        paths
    }

    fn collect_paths(
        &self,
        id: &ObjectId,
        suffix: &mut Vec<String>,
        visiting: &mut HashSet<ObjectId>,
        out: &mut Vec<Vec<String>>,
    ) {
        if id.is_root() {
            out.push(suffix.iter().rev().cloned().collect());
            return;
        }
        if !visiting.insert(id.clone()) {
            return;
        }
        if let Some(parents) = self.parents.get(id) {
            let mut sorted: Vec<&ParentRef> = parents.iter().collect();
            sorted.sort();
            for edge in sorted {
                suffix.push(edge.key.clone());
                self.collect_paths(&edge.parent_id, suffix, visiting, out);
                suffix.pop();
            }
        }
        visiting.remove(id);
    }

    /// Resolve `key` in the map `map_id` with uniform absence rules: an
    /// absent key, a tombstoned entry, and an entry resolving to a
    /// tombstoned or missing referenced object all read the same way.
    pub fn map_get(&self, map_id: &ObjectId, key: &str) -> Option<Value> {
        let object = self.objects.get(map_id)?;
        if object.is_tombstoned() {
            return None;
        }
        let entry = object.map_data()?.entry(key)?;
        if !entry.is_visible() {
            return None;
        }
        match entry.value.as_ref()? {
            Value::Reference(target) => {
                let target_object = self.objects.get(target)?;
                if target_object.is_tombstoned() {
                    None
                } else {
                    Some(Value::Reference(target.clone()))
                }
            }
            primitive => Some(primitive.clone()),
        }
    }

    /// Current count of the counter `id`, absent if the object is missing
    /// or tombstoned.
    pub fn counter_value(&self, id: &ObjectId) -> Option<f64> {
        let object = self.objects.get(id)?;
        if object.is_tombstoned() {
            return None;
        }
        object.counter_data().map(|c| c.count())
    }

    /// Depth-first export of the subgraph under `id`.
    ///
    /// Revisiting an ancestor returns the same shared (still-mutating) map
    /// node instead of recursing, so cyclic graphs export in one pass.
    pub fn compact(&self, id: &ObjectId) -> Option<CompactValue> {
        let mut memo = HashMap::new();
        self.compact_inner(id, &mut memo)
    }

    fn compact_inner(
        &self,
        id: &ObjectId,
        memo: &mut HashMap<ObjectId, CompactMap>,
    ) -> Option<CompactValue> {
        let object = self.objects.get(id)?;
        if object.is_tombstoned() {
            return None;
        }
        match object.data() {
            ObjectData::Counter(counter) => Some(CompactValue::Counter(counter.count())),
            ObjectData::Map(map) => {
                if let Some(shared) = memo.get(id) {
                    return Some(CompactValue::Map(shared.clone()));
                }
                let node: CompactMap = Rc::new(RefCell::new(BTreeMap::new()));
                memo.insert(id.clone(), node.clone());
                for (key, entry) in map.entries() {
                    if !entry.is_visible() {
                        continue;
                    }
                    match entry.value.as_ref() {
                        Some(Value::Primitive(p)) => {
                            node.borrow_mut()
                                .insert(key.clone(), CompactValue::Primitive(p.clone()));
                        }
                        Some(Value::Reference(target)) => {
                            if let Some(child) = self.compact_inner(target, memo) {
                                node.borrow_mut().insert(key.clone(), child);
                            }
                        }
                        None => {}
                    }
                }
                Some(CompactValue::Map(node))
            }
        }
    }

    /// Same traversal as [`compact`](Self::compact), rendered to JSON.
    /// Already-visited ids become `{"objectId": …}` markers and binary
    /// leaves a hex string, so the output is plain-text safe.
    pub fn compact_json(&self, id: &ObjectId) -> Option<serde_json::Value> {
        let mut visited = HashSet::new();
        self.compact_json_inner(id, &mut visited)
    }

    fn compact_json_inner(
        &self,
        id: &ObjectId,
        visited: &mut HashSet<ObjectId>,
    ) -> Option<serde_json::Value> {
        let object = self.objects.get(id)?;
        if object.is_tombstoned() {
            return None;
        }
        match object.data() {
            ObjectData::Counter(counter) => Some(json!(counter.count())),
            ObjectData::Map(map) => {
                if visited.contains(id) {
                    return Some(json!({ "objectId": id.as_str() }));
                }
                visited.insert(id.clone());
                let mut rendered = serde_json::Map::new();
                for (key, entry) in map.entries() {
                    if !entry.is_visible() {
                        continue;
                    }
                    match entry.value.as_ref() {
                        Some(Value::Primitive(p)) => {
                            rendered.insert(key.clone(), p.to_json());
                        }
                        Some(Value::Reference(target)) => {
                            if let Some(child) = self.compact_json_inner(target, visited) {
                                rendered.insert(key.clone(), child);
                            }
                        }
                        None => {}
                    }
                }
                Some(serde_json::Value::Object(rendered))
            }
        }
    }

    /// Sweep expired tombstones: map entries past the grace period in
    /// every live map, plus tombstoned objects past the grace period that
    /// nothing references any more. Swept data was already invisible.
    pub fn gc_sweep(&mut self, now: u64, grace_ms: u64) -> GcStats {
        let mut stats = GcStats::default();
        for object in self.objects.values_mut() {
            if let Some(map) = object.map_data_mut() {
                stats.entries_swept += map.gc_sweep(now, grace_ms);
            }
        }
        let expired: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(id, object)| {
                !id.is_root()
                    && object.is_tombstoned()
                    && object
                        .tombstoned_at()
                        .map_or(false, |at| now.saturating_sub(at) >= grace_ms)
                    && self.parents.get(id).map_or(true, |p| p.is_empty())
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.objects.remove(&id);
            self.parents.remove(&id);
            stats.objects_swept += 1;
        }
        stats
    }
}

/// What one GC pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub entries_swept: usize,
    pub objects_swept: usize,
}
