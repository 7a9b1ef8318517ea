//! Errors in the library.
use thiserror::Error;

/// Errors raised while constructing or running a policy graph.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Invalid construction configuration, raised eagerly at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A mandatory observation mode is absent.
    #[error("required mode `{0}` not found in observation spec")]
    MissingMode(String),

    /// Episode metadata is absent or malformed.
    #[error("episode metadata error: {0}")]
    Metadata(String),

    /// Runtime tensor shapes violate a precondition.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}
