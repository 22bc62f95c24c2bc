use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Writer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Maximum postings per block
    pub block_limit: usize,
    /// Terms with fewer postings than this (that never fill a block) are
    /// stored inside their TermInfo
    pub inline_limit: usize,
    /// Block records at or below this many bytes are never compressed
    pub compress_threshold: usize,
    /// Whether block records above the threshold are LZ4 compressed
    pub compress_blocks: bool,
    /// Posting pool memory budget before a sorted run is spilled
    pub pool_limit_bytes: usize,
    /// How long to retry acquiring the write lock
    pub lock_timeout: Duration,
    /// Initial backoff between lock attempts (doubles up to 250ms)
    pub lock_retry_delay: Duration,
    /// Bundle the segment files into a single compound file
    pub compound: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            block_limit: 128,
            inline_limit: 2,
            compress_threshold: 64,
            compress_blocks: true,
            // 128MB
            pool_limit_bytes: 128 * 1024 * 1024,
            lock_timeout: Duration::from_secs(0),
            lock_retry_delay: Duration::from_millis(10),
            compound: true,
        }
    }
}

/// Configuration presets for different ingestion workloads
#[derive(Clone, Debug)]
pub enum WriterProfile {
    LowMemory,
    Balanced,
    Bulk,
}

impl WriterProfile {
    /// Get the posting pool budget for this profile
    pub fn pool_limit_bytes(&self) -> usize {
        match self {
            WriterProfile::LowMemory => 4 * 1024 * 1024,
            WriterProfile::Balanced => 128 * 1024 * 1024,
            WriterProfile::Bulk => 512 * 1024 * 1024,
        }
    }

    /// Get the block size for this profile
    pub fn block_limit(&self) -> usize {
        match self {
            WriterProfile::LowMemory => 64,
            WriterProfile::Balanced => 128,
            WriterProfile::Bulk => 256,
        }
    }

    /// Apply this profile to a WriterConfig
    pub fn apply_to(&self, config: &mut WriterConfig) {
        config.pool_limit_bytes = self.pool_limit_bytes();
        config.block_limit = self.block_limit();
    }
}

impl WriterConfig {
    /// Apply a profile to this configuration
    pub fn with_profile(mut self, profile: WriterProfile) -> Self {
        profile.apply_to(&mut self);
        self
    }

    pub fn with_block_limit(mut self, limit: usize) -> Self {
        self.block_limit = limit.max(1);
        self
    }

    pub fn with_inline_limit(mut self, limit: usize) -> Self {
        self.inline_limit = limit;
        self
    }

    pub fn with_pool_limit_bytes(mut self, bytes: usize) -> Self {
        self.pool_limit_bytes = bytes;
        self
    }

    pub fn with_compress_threshold(mut self, bytes: usize) -> Self {
        self.compress_threshold = bytes;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_blocks = enabled;
        self
    }

    /// Set how long `Index::writer` keeps retrying a held lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_compound(mut self, compound: bool) -> Self {
        self.compound = compound;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WriterConfig::default();
        assert_eq!(config.block_limit, 128);
        assert_eq!(config.inline_limit, 2);
        assert!(config.compound);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(WriterProfile::LowMemory.block_limit(), 64);
        assert_eq!(WriterProfile::Bulk.pool_limit_bytes(), 512 * 1024 * 1024);

        let config = WriterConfig::default()
            .with_profile(WriterProfile::LowMemory)
            .with_compound(false)
            .with_block_limit(0);
        assert_eq!(config.pool_limit_bytes, 4 * 1024 * 1024);
        assert_eq!(config.block_limit, 1);
        assert!(!config.compound);
    }

    #[test]
    fn test_config_serde() {
        let config = WriterConfig::default().with_lock_timeout(Duration::from_secs(3));
        let json = serde_json::to_string(&config).unwrap();
        let restored: WriterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.lock_timeout, Duration::from_secs(3));
    }
}
