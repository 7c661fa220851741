//! Error types for the depth replication service

use thiserror::Error;

/// Depth replication errors
#[derive(Error, Debug)]
pub enum DepthError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Order book for {0} is not initialized")]
    NotInitialized(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Rate limited by exchange, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Snapshot for {symbol} still stale after {attempts} attempts")]
    SnapshotExhausted { symbol: String, attempts: u32 },

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for DepthError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DepthError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for DepthError {
    fn from(err: serde_json::Error) -> Self {
        DepthError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for DepthError {
    fn from(err: reqwest::Error) -> Self {
        DepthError::RestApiError(err.to_string())
    }
}

impl From<std::io::Error> for DepthError {
    fn from(err: std::io::Error) -> Self {
        DepthError::IpcError(err.to_string())
    }
}

impl From<::config::ConfigError> for DepthError {
    fn from(err: ::config::ConfigError) -> Self {
        DepthError::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for DepthError {
    fn from(err: prometheus::Error) -> Self {
        DepthError::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DepthError>;
