//! Channel adapter abstraction.
//!
//! The engine never talks to the network directly: attach lifecycle,
//! framing and transport policy belong to the enclosing channel. The
//! adapter exposes exactly what the engine needs - a publish call, the
//! channel's current state and error, and the server-advertised GC grace
//! period when there is one.

use crate::error::{Result, SyncError};
use crate::message::{ObjectMessage, PublishAck};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rso_core::Timeserial;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default maximum encoded size of a single publish.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Connection state of the enclosing channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    /// Whether operations may still be carried or waited on.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ChannelState::Initialized | ChannelState::Attaching | ChannelState::Attached
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Attaching => "attaching",
            ChannelState::Attached => "attached",
            ChannelState::Detached => "detached",
            ChannelState::Suspended => "suspended",
            ChannelState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An error reported by the channel itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// What the engine consumes from the transport layer.
#[async_trait]
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Publish a group of operation messages as one network write.
    /// Returns the origin site and the per-operation serials the server
    /// assigned.
    async fn publish(&self, messages: Vec<ObjectMessage>) -> Result<PublishAck>;

    fn state(&self) -> ChannelState;

    fn error_info(&self) -> Option<ErrorInfo>;

    /// Server-advertised GC grace period, if any was communicated.
    fn gc_grace_period(&self) -> Option<Duration> {
        None
    }

    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }
}

/// In-memory adapter for tests and simulation.
///
/// Serials are assigned from a monotonic per-channel clock, the way a
/// server would stamp accepted writes for one site.
pub struct MemoryChannel {
    site_code: String,
    state: RwLock<ChannelState>,
    error: RwLock<Option<ErrorInfo>>,
    next_timestamp: AtomicU64,
    published: Mutex<Vec<Vec<ObjectMessage>>>,
    grace_period: RwLock<Option<Duration>>,
}

impl MemoryChannel {
    pub fn new(site_code: impl Into<String>) -> Self {
        Self {
            site_code: site_code.into(),
            state: RwLock::new(ChannelState::Attached),
            error: RwLock::new(None),
            next_timestamp: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
            grace_period: RwLock::new(None),
        }
    }

    pub fn site_code(&self) -> &str {
        &self.site_code
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    pub fn set_error(&self, error: ErrorInfo) {
        *self.error.write() = Some(error);
    }

    pub fn set_grace_period(&self, grace: Duration) {
        *self.grace_period.write() = Some(grace);
    }

    /// Every publish this channel has accepted, in order.
    pub fn published(&self) -> Vec<Vec<ObjectMessage>> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl ChannelAdapter for MemoryChannel {
    async fn publish(&self, messages: Vec<ObjectMessage>) -> Result<PublishAck> {
        let state = self.state();
        if !state.is_usable() {
            return Err(SyncError::ChannelUnusable {
                state,
                cause: self.error_info(),
            });
        }
        let serials: Vec<Option<Timeserial>> = messages
            .iter()
            .map(|_| {
                let timestamp = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
                Some(Timeserial::new(self.site_code.clone(), timestamp, 0))
            })
            .collect();
        self.published.lock().push(messages);
        Ok(PublishAck {
            origin_site: self.site_code.clone(),
            serials,
        })
    }

    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    fn error_info(&self) -> Option<ErrorInfo> {
        self.error.read().clone()
    }

    fn gc_grace_period(&self) -> Option<Duration> {
        *self.grace_period.read()
    }
}
