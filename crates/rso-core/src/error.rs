//! Error types for the core object model.

use thiserror::Error;

/// Errors raised by the object pool and merge engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectError {
    #[error("invalid timeserial: {0:?}")]
    InvalidTimeserial(String),

    #[error("invalid object id: {0:?}")]
    InvalidObjectId(String),

    /// An operation was dispatched to an object other than the one its
    /// embedded id names. This is a dispatch bug, not a runtime condition.
    #[error("object id mismatch: operation targets {operation}, dispatched to {target}")]
    ObjectIdMismatch { operation: String, target: String },

    #[error("object not found in pool: {0}")]
    NotFound(String),

    /// The operation's action does not apply to the target's collection
    /// kind (e.g. a counter increment addressed to a map).
    #[error("operation {action} does not match object type of {id}")]
    TypeMismatch { id: String, action: String },
}

pub type Result<T> = std::result::Result<T, ObjectError>;
