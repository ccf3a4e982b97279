//! Batched writes: multiple mutation intents, one network publish.
//!
//! Intents are queued without building their wire payloads (creates are
//! the exception - their id derivation happens up front so the caller
//! gets the new id back immediately). The batch closes the instant
//! `flush` begins; anything issued against it afterwards is rejected.

use crate::channel::ChannelAdapter;
use crate::engine::{now_ms, SyncEngine};
use crate::error::{Result, SyncError};
use crate::message::ObjectMessage;
use crate::write;
use rso_core::{ObjectId, ObjectType, Value};
use std::collections::{BTreeMap, HashSet};

enum WriteIntent {
    MapSet {
        target: ObjectId,
        key: String,
        value: Value,
    },
    MapRemove {
        target: ObjectId,
        key: String,
    },
    CounterInc {
        target: ObjectId,
        amount: f64,
    },
    Prepared(ObjectMessage),
}

/// A group of mutations flushed as a single publish.
pub struct Batch<'a, C: ChannelAdapter> {
    engine: &'a SyncEngine<C>,
    intents: Vec<WriteIntent>,
    /// Ids created earlier in this batch; not in the pool yet, but valid
    /// targets for later intents.
    created: HashSet<ObjectId>,
    closed: bool,
}

impl<'a, C: ChannelAdapter> Batch<'a, C> {
    pub(crate) fn new(engine: &'a SyncEngine<C>) -> Self {
        Self {
            engine,
            intents: Vec::new(),
            created: HashSet::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SyncError::BatchClosed);
        }
        Ok(())
    }

    fn validate_target(&self, target: &ObjectId, expected: ObjectType) -> Result<()> {
        if self.created.contains(target) {
            if target.object_type() != expected {
                return Err(SyncError::InvalidWrite(format!(
                    "object {} is not a {}",
                    target, expected
                )));
            }
            return Ok(());
        }
        self.engine
            .with_pool(|pool| write::validate_target(pool, target, expected))
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn set(&mut self, target: &ObjectId, key: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        write::validate_key(key)?;
        self.validate_target(target, ObjectType::Map)?;
        self.intents.push(WriteIntent::MapSet {
            target: target.clone(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    pub fn remove(&mut self, target: &ObjectId, key: &str) -> Result<()> {
        self.ensure_open()?;
        write::validate_key(key)?;
        self.validate_target(target, ObjectType::Map)?;
        self.intents.push(WriteIntent::MapRemove {
            target: target.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn increment(&mut self, target: &ObjectId, amount: f64) -> Result<()> {
        self.ensure_open()?;
        write::validate_amount(amount)?;
        self.validate_target(target, ObjectType::Counter)?;
        self.intents.push(WriteIntent::CounterInc {
            target: target.clone(),
            amount,
        });
        Ok(())
    }

    pub fn decrement(&mut self, target: &ObjectId, amount: f64) -> Result<()> {
        self.increment(target, -amount)
    }

    /// Queue a map create; the derived id is returned immediately and
    /// can be referenced by later intents in the same batch.
    pub fn create_map(&mut self, initial: BTreeMap<String, Value>) -> Result<ObjectId> {
        self.ensure_open()?;
        let (id, message) = write::map_create(initial, now_ms())?;
        self.created.insert(id.clone());
        self.intents.push(WriteIntent::Prepared(message));
        Ok(id)
    }

    /// Queue a counter create; the derived id is returned immediately.
    pub fn create_counter(&mut self, count: f64) -> Result<ObjectId> {
        self.ensure_open()?;
        let (id, message) = write::counter_create(count, now_ms())?;
        self.created.insert(id.clone());
        self.intents.push(WriteIntent::Prepared(message));
        Ok(id)
    }

    /// Build every queued intent and publish the lot as one write.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;

        let messages: Vec<ObjectMessage> = self
            .intents
            .drain(..)
            .map(|intent| match intent {
                WriteIntent::MapSet { target, key, value } => write::map_set(&target, &key, value),
                WriteIntent::MapRemove { target, key } => write::map_remove(&target, &key),
                WriteIntent::CounterInc { target, amount } => write::counter_inc(&target, amount),
                WriteIntent::Prepared(message) => message,
            })
            .collect();

        if messages.is_empty() {
            return Ok(());
        }
        self.engine.publish_and_apply_locally(messages).await
    }
}
