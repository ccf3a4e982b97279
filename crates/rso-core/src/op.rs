//! Decoded operation and snapshot records.
//!
//! Wire encoding and decoding live outside this crate; the merge engine
//! only ever sees these typed records. Actions are a closed sum so every
//! merge function matches exhaustively - adding an action is a
//! compile-time-checked exercise.

use crate::map::MapEntry;
use crate::objectid::{ObjectId, ObjectType};
use crate::timeserial::Timeserial;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A single mutation against one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObjectOperation {
    MapCreate { entries: BTreeMap<String, MapEntry> },
    MapSet { key: String, value: Value },
    MapRemove { key: String },
    CounterCreate { count: Option<f64> },
    CounterInc { amount: f64 },
    ObjectDelete,
}

impl ObjectOperation {
    /// Short action name, used in logs and errors.
    pub fn action(&self) -> &'static str {
        match self {
            ObjectOperation::MapCreate { .. } => "MAP_CREATE",
            ObjectOperation::MapSet { .. } => "MAP_SET",
            ObjectOperation::MapRemove { .. } => "MAP_REMOVE",
            ObjectOperation::CounterCreate { .. } => "COUNTER_CREATE",
            ObjectOperation::CounterInc { .. } => "COUNTER_INC",
            ObjectOperation::ObjectDelete => "OBJECT_DELETE",
        }
    }

    /// The collection kind this action applies to; `None` for actions
    /// valid on any kind.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            ObjectOperation::MapCreate { .. }
            | ObjectOperation::MapSet { .. }
            | ObjectOperation::MapRemove { .. } => Some(ObjectType::Map),
            ObjectOperation::CounterCreate { .. } | ObjectOperation::CounterInc { .. } => {
                Some(ObjectType::Counter)
            }
            ObjectOperation::ObjectDelete => None,
        }
    }
}

/// One object's full state as carried by a snapshot page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub object_id: ObjectId,
    pub site_timeserials: HashMap<String, Timeserial>,
    pub tombstone: bool,
    pub tombstoned_at: Option<u64>,
    /// Create-operation data, if the snapshot carries it. Merged exactly
    /// once on objects that had not merged their create yet.
    pub create_op: Option<ObjectOperation>,
    pub map_entries: Option<BTreeMap<String, MapEntry>>,
    pub counter_count: Option<f64>,
}

impl ObjectState {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            site_timeserials: HashMap::new(),
            tombstone: false,
            tombstoned_at: None,
            create_op: None,
            map_entries: None,
            counter_count: None,
        }
    }

    /// A snapshot payload must carry map data, counter data, create data
    /// or a tombstone; anything else is malformed and gets dropped.
    pub fn has_payload(&self) -> bool {
        self.tombstone
            || self.map_entries.is_some()
            || self.counter_count.is_some()
            || self.create_op.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(ObjectOperation::ObjectDelete.action(), "OBJECT_DELETE");
        assert_eq!(
            ObjectOperation::CounterInc { amount: 1.0 }.action(),
            "COUNTER_INC"
        );
    }

    #[test]
    fn test_action_object_types() {
        let set = ObjectOperation::MapSet {
            key: "k".into(),
            value: "v".into(),
        };
        assert_eq!(set.object_type(), Some(ObjectType::Map));
        assert_eq!(ObjectOperation::ObjectDelete.object_type(), None);
    }

    #[test]
    fn test_empty_state_has_no_payload() {
        let id = ObjectId::generate(ObjectType::Map, b"{}", b"n", 1);
        let mut state = ObjectState::new(id);
        assert!(!state.has_payload());
        state.tombstone = true;
        assert!(state.has_payload());
    }
}
