//! Trading API error types.

use thiserror::Error;

/// Errors from the trading REST API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Access token missing, expired or revoked. Never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Server answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the response body.
        message: String,
    },

    /// Request could not be built.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Network error (retryable).
    #[error("network error: {0}")]
    Network(String),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),
}

impl ApiError {
    /// Whether the same call may succeed if repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Unauthorized(_) | Self::Http(_) | Self::JsonParse(_) => false,
        }
    }

    /// Whether the credentials were rejected.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Errors from the request dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Dispatcher was shut down before the call got a slot.
    #[error("dispatcher is shut down")]
    Closed,

    /// The call itself failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DispatchError {
    /// Whether the credentials were rejected.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(ApiError::Unauthorized(_)))
    }
}
