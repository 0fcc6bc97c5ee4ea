//! Core types and worker pools for ferrofile.
//!
//! This crate provides the pieces shared by the operation and search
//! engines: engine configuration, the error taxonomy, and the bounded
//! worker pools both engines schedule their work on.

mod config;
mod error;
mod pool;

pub use config::{
    EngineConfig, EngineConfigBuilder, DEFAULT_CHANNEL_SIZE, DEFAULT_LARGE_FILE_THRESHOLD,
    DEFAULT_MAX_SEARCH_RESULTS, DEFAULT_SHUTDOWN_GRACE_MS,
};
pub use error::{BatchError, PoolError, UnitError};
pub use pool::{PoolTask, ResourcePools, WorkerPool};

// Shared cancellation primitive for batches and searches.
pub use tokio_util::sync::CancellationToken;
