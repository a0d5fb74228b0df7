//! Error types for the HTTP API client.

use thiserror::Error;

/// Errors raised while talking to the agent's HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent answered with a non-success status.
    #[error("unexpected response code {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A KV value was not valid base64.
    #[error("failed to decode value: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid HTTP address: {0}")]
    InvalidAddress(String),

    /// A blocking query response came back without `X-Consul-Index`.
    #[error("missing index header in blocking query response")]
    MissingIndex,
}

pub type Result<T> = std::result::Result<T, ApiError>;
