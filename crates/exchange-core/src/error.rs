//! Error types for the trailing-stop system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },

    #[error("{operation} timed out after {after_secs}s")]
    Timeout { operation: String, after_secs: u64 },

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Signing error: {message}")]
    Signing { message: String },
}

impl Error {
    /// Whether this is a transport-level failure (network, venue rejection,
    /// rate limit or timeout). These are recovered by skipping the cycle.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_) | Error::Http(_) | Error::Api { .. } | Error::Timeout { .. }
        )
    }

    pub fn data_unavailable(what: impl Into<String>) -> Self {
        Error::DataUnavailable(what.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
