//! Error types for searches.

use ferrofile_core::PoolError;
use thiserror::Error;

/// Errors raised before a search starts walking.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The wildcard pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The search could not be scheduled.
    #[error(transparent)]
    Pool(#[from] PoolError),
}
