//! Error types for the embedding engine.

use thiserror::Error;

/// Errors surfaced by the engine to its callers.
///
/// Per-iteration anomalies inside the optimizer never produce one of these;
/// they are logged and show up in telemetry instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or out-of-range parameter, rejected before the loop starts
    #[error("configuration error: {0}")]
    Config(String),

    /// Dataset could not be used (empty, ragged, mismatched labels)
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Interaction event could not be accepted
    #[error("interaction error: {0}")]
    Interaction(String),

    /// Operation needs a running session
    #[error("no session is running")]
    NotRunning,

    /// `start` called while a session is already running
    #[error("a session is already running")]
    AlreadyRunning,

    /// A worker task panicked or was cancelled
    #[error("worker failed: {0}")]
    Worker(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the engine error.
pub type Result<T> = std::result::Result<T, EngineError>;
