/*!
 * Error types for the litwai engine.
 *
 * Provider adapters return `ProviderError`, the translation core returns
 * `TranslationError`, and the binary wraps everything in `AppError`.
 * Every error maps onto an `ErrorKind`, which is what the retry controller
 * and the pipeline actually branch on.
 */

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classes the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Network reset, 5xx, timeout, 429
    Transient,

    /// Input plus output exceeds the model window
    ContextOverflow,

    /// The provider declined the content
    Refusal,

    /// Empty, echoed or wrong-script output
    Malformed,

    /// Invalid credential, exhausted balance, suspended account
    AuthOrQuota,

    /// Missing credential, unknown model, incompatible script/language
    Configuration,

    /// Surfaced by a document reader
    Reader,

    /// Surfaced by a document writer
    Writer,

    /// Invariant violation
    Internal,

    /// The run was cancelled
    Cancelled,
}

impl ErrorKind {
    /// Kinds that abort the whole run
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::AuthOrQuota | ErrorKind::Configuration | ErrorKind::Internal
        )
    }

    /// Kinds the retry controller handles locally
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::ContextOverflow | ErrorKind::Refusal | ErrorKind::Malformed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::ContextOverflow => "contextOverflow",
            ErrorKind::Refusal => "refusal",
            ErrorKind::Malformed => "malformed",
            ErrorKind::AuthOrQuota => "authOrQuota",
            ErrorKind::Configuration => "configurationError",
            ErrorKind::Reader => "readerError",
            ErrorKind::Writer => "writerError",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur when working with provider back-ends
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// The call did not finish within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        /// Server supplied minimum wait, if any
        retry_after: Option<Duration>,
    },

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Balance or quota is exhausted
    #[error("Quota exhausted: {0}")]
    QuotaExceeded(String),

    /// The prompt does not fit the model window
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// The model declined to translate
    #[error("Content refused: {0}")]
    ContentRefused(String),

    /// The model answered with something unusable
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Adapter is misconfigured (unknown model, missing binary...)
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// The call was aborted because the run was cancelled
    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RequestFailed(_)
            | ProviderError::Timeout(_)
            | ProviderError::ConnectionError(_)
            | ProviderError::RateLimitExceeded { .. } => ErrorKind::Transient,
            ProviderError::ApiError { status_code, .. } => {
                if *status_code >= 500 || *status_code == 408 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Malformed
                }
            }
            ProviderError::AuthenticationError(_) | ProviderError::QuotaExceeded(_) => {
                ErrorKind::AuthOrQuota
            }
            ProviderError::ContextLengthExceeded(_) => ErrorKind::ContextOverflow,
            ProviderError::ContentRefused(_) => ErrorKind::Refusal,
            ProviderError::MalformedResponse(_) | ProviderError::ParseError(_) => {
                ErrorKind::Malformed
            }
            ProviderError::Configuration(_) => ErrorKind::Configuration,
            ProviderError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Minimum wait requested by the server
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors that can occur during translation
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Fatal configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Document could not be parsed
    #[error("Reader error in chapter {chapter}: {message}")]
    Reader { chapter: usize, message: String },

    /// Document could not be written
    #[error("Writer error: {0}")]
    Writer(String),

    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// IO failure, usually from the cache directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TranslationError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslationError::Provider(e) => e.kind(),
            TranslationError::Configuration(_) => ErrorKind::Configuration,
            TranslationError::Reader { .. } => ErrorKind::Reader,
            TranslationError::Writer(_) => ErrorKind::Writer,
            TranslationError::Internal(_) => ErrorKind::Internal,
            TranslationError::Cancelled => ErrorKind::Cancelled,
            TranslationError::Io(_) | TranslationError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error aborts the run
    pub fn is_fatal(&self) -> bool {
        match self {
            // a chapter-zero reader failure leaves nothing to translate
            TranslationError::Reader { chapter, .. } => *chapter == 0,
            // cache IO failures degrade to uncached operation
            TranslationError::Io(_) => false,
            other => other.kind().is_fatal(),
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
