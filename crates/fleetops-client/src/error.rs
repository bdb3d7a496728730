//! Error types for the directory client

use thiserror::Error;

/// Errors that can occur when talking to the directory service
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// API returned an error status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from server
        message: String,
    },

    /// No token configured for an authenticated endpoint
    #[error("not authenticated: set OPS_TOKEN or api.token")]
    Unauthenticated,
}

impl ClientError {
    /// True for a 404 from the API
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
