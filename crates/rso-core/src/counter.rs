//! Counter data.
//!
//! A counter is a single commutative accumulator. Increments are safe to
//! reorder; the per-site timeserial gate (enforced by the object base)
//! only guarantees that each distinct origin serial contributes once.

use serde::{Deserialize, Serialize};

/// The typed data of a counter object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterData {
    count: f64,
}

impl CounterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_count(count: f64) -> Self {
        Self { count }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    /// Add `amount` (possibly negative) and return the applied delta.
    pub fn increment(&mut self, amount: f64) -> f64 {
        self.count += amount;
        amount
    }
}
