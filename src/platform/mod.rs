//! Platform boundary: the six target networks and the adapter contract
//!
//! Everything platform-specific (request encoding, endpoints, response
//! parsing) lives behind [`PlatformAdapter`]. The core only sees the typed
//! failure taxonomy, which drives retry/refresh/pause/abort decisions in the
//! strategy cascade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::PostMetadata;
use crate::session::Session;

/// Target social platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Facebook,
    Instagram,
    Tiktok,
    X,
    Telegram,
}

impl Platform {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::X => "x",
            Self::Telegram => "telegram",
        }
    }

    /// Create from string (accepts a few common aliases)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "youtube" | "yt" => Some(Self::Youtube),
            "facebook" | "fb" => Some(Self::Facebook),
            "instagram" | "ig" => Some(Self::Instagram),
            "tiktok" => Some(Self::Tiktok),
            "x" | "twitter" => Some(Self::X),
            "telegram" | "tg" => Some(Self::Telegram),
            _ => None,
        }
    }

    /// Get all platforms
    pub fn all() -> Vec<Self> {
        vec![
            Self::Youtube,
            Self::Facebook,
            Self::Instagram,
            Self::Tiktok,
            Self::X,
            Self::Telegram,
        ]
    }

    /// API endpoint used by the channel probe for reachability checks
    pub fn api_endpoint(&self) -> &'static str {
        match self {
            Self::Youtube => "https://www.googleapis.com/youtube/v3/",
            Self::Facebook => "https://graph.facebook.com/",
            Self::Instagram => "https://graph.instagram.com/",
            Self::Tiktok => "https://open.tiktokapis.com/",
            Self::X => "https://api.x.com/2/",
            Self::Telegram => "https://api.telegram.org/",
        }
    }

    /// Whether the platform's API is blocked from some regions and warrants
    /// the via-egress upload strategy
    pub fn geo_restricted(&self) -> bool {
        matches!(self, Self::Tiktok | Self::X)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed upload failure reported by a platform adapter
///
/// The cascade classifies on these variants: `Network` is retried with
/// backoff, `Auth` triggers one session refresh, `RateLimit` pauses the
/// platform's cascade until the reset time, `Validation` aborts the cascade,
/// `Platform` advances to the next strategy.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// Connection failure, timeout, or transport-level error
    #[error("network error: {detail}")]
    Network { detail: String },

    /// Credentials rejected or session expired
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// Platform-side request budget exceeded
    #[error("rate limited")]
    RateLimit {
        /// Platform-reported reset delay, when the platform exposes one
        retry_after_secs: Option<u64>,
    },

    /// The request itself is malformed (caller error, never retried)
    #[error("rejected as invalid: {detail}")]
    Validation { detail: String },

    /// Platform-reported application error
    #[error("platform error {code}: {message}")]
    #[serde(rename = "platform_error")]
    Platform { code: u16, message: String },
}

impl UploadError {
    /// Whether the error class is worth retrying within the same strategy
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Short classification label for logs and attempt records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Auth { .. } => "auth",
            Self::RateLimit { .. } => "rate_limit",
            Self::Validation { .. } => "validation",
            Self::Platform { .. } => "platform_error",
        }
    }

    /// Create a network error
    pub fn network(detail: impl Into<String>) -> Self {
        Self::Network {
            detail: detail.into(),
        }
    }

    /// Create an auth error
    pub fn auth(detail: impl Into<String>) -> Self {
        Self::Auth {
            detail: detail.into(),
        }
    }

    /// Create a validation error
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }
}

/// Successful upload acknowledgement from a platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub platform: Platform,
    /// Platform-assigned post identifier
    pub external_id: String,
    pub posted_at: DateTime<Utc>,
}

impl UploadReceipt {
    /// Create a receipt stamped now
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
            posted_at: Utc::now(),
        }
    }
}

/// One upload request handed to an adapter
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Opaque content reference (path or blob handle)
    pub content_ref: String,
    pub metadata: PostMetadata,
    /// Replayable authenticated session, for the interface-replay strategy
    pub session: Option<Arc<Session>>,
}

impl UploadRequest {
    /// Create a plain API upload request
    pub fn new(content_ref: impl Into<String>, metadata: PostMetadata) -> Self {
        Self {
            content_ref: content_ref.into(),
            metadata,
            session: None,
        }
    }

    /// Attach a replayable session
    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }
}

/// Boundary contract implemented once per social platform
///
/// Implementations encapsulate all wire-level specifics; the core never
/// inspects anything beyond the receipt and the typed error.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter talks to
    fn platform(&self) -> Platform;

    /// Upload content, returning the platform-assigned post id
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError>;

    /// Cheap reachability check against the platform endpoint
    async fn check_reachable(&self) -> bool;
}
