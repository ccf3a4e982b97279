//! Error types for the synchronization layer.

use crate::channel::{ChannelState, ErrorInfo};
use rso_core::ObjectError;
use thiserror::Error;

/// Errors surfaced to callers of the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The channel is in a state that cannot carry the operation, or
    /// became so while the operation was waiting. Carries the channel's
    /// own error as cause when one is available.
    #[error("channel is {state} and cannot complete the operation")]
    ChannelUnusable {
        state: ChannelState,
        #[source]
        cause: Option<ErrorInfo>,
    },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Synchronous API misuse, raised before any network I/O.
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("message of {size} bytes exceeds the maximum publish size of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("batch is closed")]
    BatchClosed,

    #[error("malformed sync cursor: {0:?}")]
    InvalidCursor(String),

    #[error(transparent)]
    Object(#[from] ObjectError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
