//! Store configuration.

/// What happens to existing wrapped records when a DEK is rewrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordPolicy {
    /// Keep every record until it is pruned explicitly.
    #[default]
    Accumulate,
    /// A rewrap replaces all previous records for the reference.
    Replace,
}

/// Configuration for an encrypted content store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Plaintext chunk length of the AEAD engine.
    pub chunk_size: usize,

    /// Length of generated data-encryption keys.
    pub dek_len: usize,

    /// Record handling on rewrap.
    pub record_policy: RecordPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024, // 64 KiB
            dek_len: 32,           // AES-256
            record_policy: RecordPolicy::Accumulate,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the plaintext chunk length.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the DEK length.
    #[must_use]
    pub const fn dek_len(mut self, len: usize) -> Self {
        self.dek_len = len;
        self
    }

    /// Sets the rewrap record policy.
    #[must_use]
    pub const fn record_policy(mut self, policy: RecordPolicy) -> Self {
        self.record_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.dek_len, 32);
        assert_eq!(config.record_policy, RecordPolicy::Accumulate);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .chunk_size(4096)
            .dek_len(1)
            .record_policy(RecordPolicy::Replace);

        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.dek_len, 1);
        assert_eq!(config.record_policy, RecordPolicy::Replace);
    }
}
