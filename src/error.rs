//! Unified error handling for the nalgae crate
//!
//! Module-local errors (queue, egress, session, escalation, channel,
//! upload) stay usable on their own; this module consolidates them into a
//! single [`Error`] enum for crate boundaries, classified by
//! [`ErrorCategory`] so callers can pick a handling strategy without
//! matching every variant.
//!
//! The classification mirrors how the orchestrator reacts: validation is
//! surfaced to the caller and never retried, network errors retry with
//! backoff, auth triggers a session refresh, rate limits pause a platform,
//! egress exhaustion skips a strategy, and storage faults halt the
//! orchestrator loop.

use std::io;
use thiserror::Error;

pub use crate::alerts::channels::ChannelError;
pub use crate::egress::EgressError;
pub use crate::escalation::EscalationError;
pub use crate::platform::UploadError;
pub use crate::queue::QueueError;
pub use crate::session::SessionError;

/// Common trait for nalgae error types
pub trait NalgaeErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller error: invalid post or configuration input
    Validation,
    /// Transient network/transport failure
    Network,
    /// Credential or session failure
    Auth,
    /// Platform-side request budget exceeded
    RateLimit,
    /// Egress pool exhaustion
    Egress,
    /// Durable store or I/O failure
    Storage,
    /// Queue discipline violation (duplicate ids)
    Queue,
    /// Configuration error
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the nalgae crate
#[derive(Error, Debug)]
pub enum Error {
    /// Queue discipline errors
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Egress pool errors
    #[error("egress error: {0}")]
    Egress(#[from] EgressError),

    /// Session load/refresh errors
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Escalation queue errors
    #[error("escalation error: {0}")]
    Escalation(#[from] EscalationError),

    /// Alert channel errors
    #[error("alert channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Typed upload failures from platform adapters
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Durable store errors
    #[error("store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl NalgaeErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Queue(_) => false,
            Self::Egress(_) => true,
            Self::Session(e) => matches!(e, SessionError::RefreshFailed { .. }),
            Self::Escalation(_) => false,
            Self::Channel(_) => true,
            Self::Upload(e) => e.is_transient() || matches!(e, UploadError::RateLimit { .. }),
            Self::Store(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Queue(_) => ErrorCategory::Queue,
            Self::Egress(_) => ErrorCategory::Egress,
            Self::Session(_) => ErrorCategory::Auth,
            Self::Escalation(_) | Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Channel(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Upload(e) => match e {
                UploadError::Network { .. } => ErrorCategory::Network,
                UploadError::Auth { .. } => ErrorCategory::Auth,
                UploadError::RateLimit { .. } => ErrorCategory::RateLimit,
                UploadError::Validation { .. } => ErrorCategory::Validation,
                UploadError::Platform { .. } => ErrorCategory::Other,
            },
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Repository failures arrive as anyhow errors; all of them are store faults
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
