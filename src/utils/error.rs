//! Error types for the webhook indexer.
//!
//! This module defines a single error enumeration using `thiserror` so that
//! every layer (store, upstream webhook API, tenant databases, normalization)
//! reports failures through the same type.

use thiserror::Error;

/// Custom error type for webhook indexer operations.
///
/// Covers configuration problems, parameter validation, tenant database
/// failures, upstream webhook service failures, and dispatcher rejections.
#[derive(Debug, Error)]
pub enum WebhookIndexerError {
    /// Errors encountered during database operations.
    ///
    /// This variant automatically wraps `sqlx::Error` using the `#[from]` attribute,
    /// allowing seamless error propagation with the `?` operator.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The inbound envelope or its nested detail blob could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Indexer parameters, table names or requests failed validation.
    ///
    /// Raised synchronously; no partial state is created.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Errors related to configuration.
    ///
    /// This includes missing environment variables, invalid configuration values,
    /// or failures in parsing configuration data.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Transport-level failure talking to an HTTP API.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The upstream webhook or metadata API answered with a failure status.
    #[error("Upstream error ({status}): {message}")]
    UpstreamError {
        /// HTTP status code returned by the remote service.
        status: u16,
        /// Response body or a short description.
        message: String,
    },

    /// A keyed record (indexer, credential, mapping) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The indexer exists but is not accepting events.
    #[error("Indexer {id} is not active (status: {status})")]
    IndexerNotActive {
        /// Indexer identifier.
        id: String,
        /// Current status as stored.
        status: String,
    },

    /// A lifecycle operation was requested from a status that does not allow it.
    #[error("Invalid status transition for indexer {id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Indexer identifier.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// All retry attempts were exhausted on a transient error.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total number of attempts made.
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },

    /// Some normalized items of an event failed to write. Items that
    /// committed before or after the failure stay committed.
    #[error("{failed} of {total} items failed, first: {first_error}")]
    ItemsFailed {
        /// Number of failed items.
        failed: usize,
        /// Number of items in the event.
        total: usize,
        /// Key and error of the first failure.
        first_error: String,
    },
}

impl WebhookIndexerError {
    /// Returns `true` for errors raised by request validation.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError(_))
    }

    /// Returns `true` when the dispatcher refused an event because of the
    /// indexer's status.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::IndexerNotActive { .. })
    }
}

/// Type alias for Results using `WebhookIndexerError`.
pub type Result<T> = std::result::Result<T, WebhookIndexerError>;
