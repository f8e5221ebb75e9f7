//! Registry configuration.

use std::time::Duration;

/// Default interval between discovery passes of the background loop.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the glove update broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Configuration for a [`GloveRegistry`](crate::registry::GloveRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistryConfig {
    /// Interval between discovery passes while the background loop runs.
    /// Each pass reconnects bonded gloves that dropped.
    pub discovery_interval: Duration,
    /// Capacity of the update broadcast channel. Slow subscribers lag
    /// behind and miss updates once it fills.
    pub broadcast_capacity: usize,
}

impl RegistryConfig {
    /// Set the discovery interval.
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Set the broadcast channel capacity. Values below 1 are raised to 1.
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}
