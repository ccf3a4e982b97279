//! Path subscription router: change-notification fan-out with depth and
//! bubbling rules.
//!
//! A subscription names a path and a depth. A bubbling event at
//! `["a","b"]` notifies subscriptions at `["a","b"]` and, depth
//! permitting, at `["a"]` and the root; a non-bubbling event notifies
//! exact-path subscriptions only. Depth 1 means "only exact-path or
//! direct-overwrite events"; unbounded depth means the whole subtree.

use parking_lot::RwLock;
use rso_core::{ObjectId, ObjectUpdate};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A change notification delivered to subscribers.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// Root path the change happened at.
    pub path: Vec<String>,
    /// The object the change belongs to.
    pub object_id: ObjectId,
    /// The visible diff.
    pub update: ObjectUpdate,
    /// Whether ancestors of the path are notified too.
    pub bubbles: bool,
}

/// What a subscription listens for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathFilter {
    segments: Vec<String>,
    /// `None` is unbounded.
    depth: Option<usize>,
}

impl PathFilter {
    pub fn new(segments: Vec<String>, depth: Option<usize>) -> Self {
        Self { segments, depth }
    }

    /// Subscribe to a subtree, arbitrarily nested.
    pub fn subtree(segments: Vec<String>) -> Self {
        Self::new(segments, None)
    }

    /// Does `event` reach this subscription?
    fn matches(&self, event: &ChangeEvent) -> bool {
        if !event.bubbles {
            return self.segments == event.path;
        }
        if event.path.len() < self.segments.len() {
            return false;
        }
        if event.path[..self.segments.len()] != self.segments[..] {
            return false;
        }
        match self.depth {
            None => true,
            Some(depth) => event.path.len() - self.segments.len() + 1 <= depth,
        }
    }
}

/// Handle for cancelling a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    filter: PathFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fan-out of change events to path subscriptions.
#[derive(Default)]
pub struct Router {
    inner: RwLock<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    subscriptions: HashMap<u64, Subscription>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; events arrive on the returned receiver.
    pub fn subscribe(
        &self,
        filter: PathFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.insert(id, Subscription { filter, sender });
        (SubscriptionId(id), receiver)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.write().subscriptions.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().subscriptions.is_empty()
    }

    /// Deliver `event` to every matching subscription. Subscriptions
    /// whose receiver has been dropped are pruned on the way. Returns
    /// the number of deliveries.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut inner = self.inner.write();
        let mut delivered = 0;
        inner.subscriptions.retain(|_, sub| {
            if !sub.filter.matches(event) {
                return true;
            }
            match sub.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }
}
