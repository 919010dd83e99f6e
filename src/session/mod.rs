//! Replayable authenticated sessions
//!
//! The interface-replay upload strategy needs an authenticated browser/API
//! session (cookies and tokens) per platform. Sessions are produced and
//! refreshed by an external [`SessionProvider`]; this module keeps a
//! read-mostly in-process cache in front of it. Refresh uses copy-then-swap
//! so an in-flight reader never observes a half-written session.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::platform::Platform;

/// Errors from session loading and refresh
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No stored session for the platform
    #[error("no session available for {0}")]
    Missing(Platform),

    /// The provider could not mint a fresh session
    #[error("session refresh failed for {platform}: {reason}")]
    RefreshFailed { platform: Platform, reason: String },

    /// Provider-side storage failure
    #[error("session store error: {0}")]
    Store(String),
}

/// A replayable authenticated session for one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub platform: Platform,

    /// Serialized credential/cookie blob, opaque to the core
    pub blob: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session valid for the given number of hours
    pub fn new(platform: Platform, blob: impl Into<String>, valid_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            platform,
            blob: blob.into(),
            created_at: now,
            expires_at: now + Duration::hours(valid_hours),
        }
    }

    /// Whether the session has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Seconds until expiry (negative when already expired)
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

/// External collaborator producing and persisting sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Load the stored session for a platform, if any
    async fn load(&self, platform: Platform) -> Result<Option<Session>, SessionError>;

    /// Persist a session
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Mint a fresh session (may fail, e.g. login challenge)
    async fn refresh(&self, platform: Platform) -> Result<Session, SessionError>;
}

/// Read-mostly session cache in front of a [`SessionProvider`]
pub struct SessionStore {
    provider: Arc<dyn SessionProvider>,

    /// Copy-then-swap cache: readers clone the Arc, refresh swaps it whole
    cache: RwLock<HashMap<Platform, Arc<Session>>>,
}

impl SessionStore {
    /// Create a store backed by the given provider
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a non-expired session, consulting the provider on cache miss
    pub async fn get(&self, platform: Platform) -> Result<Arc<Session>, SessionError> {
        {
            let cache = self.cache.read().await;
            if let Some(session) = cache.get(&platform) {
                if !session.is_expired() {
                    return Ok(Arc::clone(session));
                }
            }
        }

        match self.provider.load(platform).await? {
            Some(session) if !session.is_expired() => {
                let session = Arc::new(session);
                self.cache
                    .write()
                    .await
                    .insert(platform, Arc::clone(&session));
                Ok(session)
            }
            Some(_) => {
                tracing::debug!(%platform, "stored session expired");
                Err(SessionError::Missing(platform))
            }
            None => Err(SessionError::Missing(platform)),
        }
    }

    /// Mint a fresh session through the provider and swap it into the cache
    pub async fn refresh(&self, platform: Platform) -> Result<Arc<Session>, SessionError> {
        let fresh = self.provider.refresh(platform).await?;
        self.provider.save(&fresh).await?;

        let fresh = Arc::new(fresh);
        self.cache
            .write()
            .await
            .insert(platform, Arc::clone(&fresh));

        tracing::info!(%platform, expires_in = fresh.seconds_until_expiry(), "session refreshed");
        Ok(fresh)
    }

    /// Drop the cached session for a platform
    pub async fn invalidate(&self, platform: Platform) {
        self.cache.write().await.remove(&platform);
    }
}
