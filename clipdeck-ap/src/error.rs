//! Error types for clipdeck-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for clipdeck-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected configuration value (previous value stays in effect)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source could not be opened or decoded, even after the repair pass
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sample-rate conversion failed for a chunk
    #[error("Sample rate conversion error: {0}")]
    Convert(String),

    /// Output device disappeared or refused to start
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Any other audio output device error
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Enqueue refused because the queue limit was reached
    #[error("Queue is full (limit {limit})")]
    QueueFull { limit: usize },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed console or collaborator input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Track, device or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Errors bubbled up from the shared crate (config files)
    #[error(transparent)]
    Common(#[from] clipdeck_common::Error),
}

/// Convenience Result type using clipdeck-ap Error
pub type Result<T> = std::result::Result<T, Error>;
