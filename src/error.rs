//! Error types shared across the library.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the generative backend. None of these are fatal: callers
/// swap them for a fixed apology string and leave their state untouched.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response contained no text")]
    EmptyResponse,

    #[error("backend is unavailable: {0}")]
    Unavailable(String),
}

/// Failures writing persisted state. Reads never fail: corrupt or missing
/// data is treated as absent.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("failed to serialize value for {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
}

/// Failures reported synchronously by a speech engine.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to start speech program {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("speech engine is not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
