//! # Error Types
//!
//! Custom error types for Fleet Track using `thiserror`.

use thiserror::Error;

/// Main error type for Fleet Track
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port could not be opened or configured
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial link dropped (read error or EOF)
    #[error("Serial link disconnected: {0}")]
    LinkDisconnected(String),

    /// Bus payload or topic that does not carry a usable position
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Vincenty inverse did not converge (near-antipodal points)
    #[error("Geodesic solver did not converge after {0} iterations")]
    NonConvergent(usize),

    /// Message bus client errors
    #[error("Message bus error: {0}")]
    Bus(String),
}

/// Result type alias for Fleet Track
pub type Result<T> = std::result::Result<T, TrackerError>;
