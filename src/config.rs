//! Buffer configuration.

/// Environment variable overriding the default channel name.
pub const CHANNEL_ENV_VAR: &str = "OSMOSIS_CHANNEL";

/// Configuration shared by output and input buffers.
///
/// All units travel on a named channel; buffers only exchange events with
/// buffers on the same channel. The remaining knobs tune how an input
/// buffer recovers from reordered or lost updates.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Channel name scoping all topics of this buffer.
    pub channel: String,
    /// Whether an input buffer may request full-state resyncs from owners.
    pub resync: bool,
    /// Maximum out-of-order updates queued per unit before forcing a resync.
    pub pending_limit: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            channel: "default".to_owned(),
            resync: true,
            pending_limit: 32,
        }
    }
}

impl BufferConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config, reading the channel name from the environment.
    ///
    /// Uses [`CHANNEL_ENV_VAR`] when set, the default channel otherwise.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(channel) = std::env::var(CHANNEL_ENV_VAR) {
            if !channel.is_empty() {
                config.channel = channel;
            }
        }
        config
    }

    /// Set the channel name.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Enable or disable resync requests.
    pub fn with_resync(mut self, resync: bool) -> Self {
        self.resync = resync;
        self
    }

    /// Set the per-unit reorder queue bound.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BufferConfig::default();
        assert_eq!(config.channel, "default");
        assert!(config.resync);
        assert_eq!(config.pending_limit, 32);
    }

    #[test]
    fn test_builder() {
        let config = BufferConfig::new()
            .with_channel("dialogue")
            .with_resync(false)
            .with_pending_limit(8);
        assert_eq!(config.channel, "dialogue");
        assert!(!config.resync);
        assert_eq!(config.pending_limit, 8);
    }
}
