//! Engine configuration.

use std::time::Duration;

/// Local fallback for the GC grace period when the server does not
/// advertise one.
pub const DEFAULT_GC_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the background GC task sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the sync engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Overrides the GC grace period. The server-advertised value, when
    /// present, still takes precedence.
    pub gc_grace_period: Option<Duration>,
    /// Interval between background GC sweeps.
    pub gc_interval: Duration,
    /// Capacity of the engine event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: None,
            gc_interval: DEFAULT_GC_INTERVAL,
            event_capacity: 100,
        }
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn gc_grace_period(mut self, grace: Duration) -> Self {
        self.config.gc_grace_period = Some(grace);
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.config.gc_interval = interval;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
