//! Error types for hierarchy construction and maintenance.

use thiserror::Error;

/// Errors reported by builders, refit and tree validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The primitive set handed to a builder cannot produce a tree.
    #[error("invalid builder input: {0}")]
    InvalidInput(String),

    /// Node array, primitive indices and build order disagree with each other.
    #[error("inconsistent hierarchy topology: {0}")]
    InvalidTopology(String),

    /// A host supplied primitive index does not exist.
    #[error("primitive index {index} is out of range for {len} primitives")]
    IndexOutOfRange { index: usize, len: usize },

    /// The build was stopped through its cancellation flag.
    #[error("build was cancelled")]
    Cancelled,
}

/// Result type for hierarchy operations.
pub type Result<T> = std::result::Result<T, Error>;
