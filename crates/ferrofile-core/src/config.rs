//! Engine configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default channel buffer size for progress and result events.
pub const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Default cap on the number of results a single search may return.
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 1000;

/// Files strictly larger than this are reported by the large-file search.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default grace period given to in-flight work when the pools shut down.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3000;

/// Configuration for the operation and search engines.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Threads in the I/O pool (0 = `max(8, 2 × cores)`).
    #[builder(default = "0")]
    #[serde(default)]
    pub io_threads: usize,

    /// Threads in the CPU pool (0 = number of cores).
    #[builder(default = "0")]
    #[serde(default)]
    pub cpu_threads: usize,

    /// Units executed simultaneously by one batch (0 = `min(max(4, N), 2 × cores)`).
    #[builder(default = "0")]
    #[serde(default)]
    pub max_concurrent_units: usize,

    /// Grace period for in-flight work on shutdown, in milliseconds.
    #[builder(default = "DEFAULT_SHUTDOWN_GRACE_MS")]
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Buffer size of the event channels handed to callers.
    #[builder(default = "DEFAULT_CHANNEL_SIZE")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Maximum number of search results.
    #[builder(default = "DEFAULT_MAX_SEARCH_RESULTS")]
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    /// Size threshold for the large-file search, in bytes.
    #[builder(default = "DEFAULT_LARGE_FILE_THRESHOLD")]
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_channel_size() -> usize {
    DEFAULT_CHANNEL_SIZE
}

fn default_max_search_results() -> usize {
    DEFAULT_MAX_SEARCH_RESULTS
}

fn default_large_file_threshold() -> u64 {
    DEFAULT_LARGE_FILE_THRESHOLD
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.channel_size == Some(0) {
            return Err("Channel size must be at least 1".to_string());
        }
        if self.max_search_results == Some(0) {
            return Err("Search result cap must be at least 1".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Number of logical cores, falling back to 1 when unknown.
    pub fn core_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Resolved size of the I/O pool.
    pub fn io_pool_size(&self) -> usize {
        match self.io_threads {
            0 => (2 * Self::core_count()).max(8),
            n => n,
        }
    }

    /// Resolved size of the CPU pool.
    pub fn cpu_pool_size(&self) -> usize {
        match self.cpu_threads {
            0 => Self::core_count(),
            n => n,
        }
    }

    /// Number of units a batch of `sources` items may run at once.
    pub fn unit_concurrency(&self, sources: usize) -> usize {
        match self.max_concurrent_units {
            0 => sources.max(4).min(2 * Self::core_count()),
            n => n,
        }
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_threads: 0,
            cpu_threads: 0,
            max_concurrent_units: 0,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            channel_size: DEFAULT_CHANNEL_SIZE,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .io_threads(4usize)
            .max_search_results(10usize)
            .build()
            .unwrap();

        assert_eq!(config.io_pool_size(), 4);
        assert_eq!(config.max_search_results, 10);
        assert_eq!(config.channel_size, DEFAULT_CHANNEL_SIZE);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
    }

    #[test]
    fn test_config_builder_rejects_zero_cap() {
        let result = EngineConfig::builder().max_search_results(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_auto_pool_sizes() {
        let config = EngineConfig::default();
        let cores = EngineConfig::core_count();

        assert_eq!(config.io_pool_size(), (2 * cores).max(8));
        assert_eq!(config.cpu_pool_size(), cores);
    }

    #[test]
    fn test_unit_concurrency() {
        let cores = EngineConfig::core_count();
        let config = EngineConfig::default();

        assert_eq!(config.unit_concurrency(1), 4.min(2 * cores));
        assert_eq!(config.unit_concurrency(1000), 2 * cores);

        let fixed = EngineConfig::builder()
            .max_concurrent_units(3usize)
            .build()
            .unwrap();
        assert_eq!(fixed.unit_concurrency(1000), 3);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{ "io_threads": 2 }"#).unwrap();

        assert_eq!(config.io_threads, 2);
        assert_eq!(config.max_search_results, DEFAULT_MAX_SEARCH_RESULTS);
        assert_eq!(config.large_file_threshold, DEFAULT_LARGE_FILE_THRESHOLD);
    }
}
