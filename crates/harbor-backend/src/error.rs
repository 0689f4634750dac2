//! Error types for backend supervision and model downloads.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while managing or talking to the inference server.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("API error: {0}")]
    Api(String),

    /// Server is not running or not reachable.
    #[error("Inference server not reachable at {0}")]
    NotRunning(String),

    /// The backend program could not be launched.
    #[error("Failed to start inference server: {0}")]
    SpawnFailed(String),

    /// The backend process exited before becoming ready.
    #[error("Inference server process exited with code {}", exit_code_display(.0))]
    ProcessExited(Option<i32>),

    /// Timeout waiting for the server to become ready.
    #[error("Inference server did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// Model file is missing where the server expects it.
    #[error("Model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    /// Model download failed.
    #[error("Failed to download model: {0}")]
    DownloadFailed(String),

    /// Checksum verification failed.
    #[error("Model checksum mismatch. Expected: {expected}, got: {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "<signal>".to_string(),
    }
}
