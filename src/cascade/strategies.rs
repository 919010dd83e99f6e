//! The concrete upload strategies
//!
//! Ordered from cheapest to most desperate: direct API call, API call
//! through an acquired egress path, replay of a stored authenticated
//! session, and finally the manual hand-off, which cannot fail — it only
//! records.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AttemptContext, StrategyError, StrategyKind, StrategyOutcome, UploadStrategy};
use crate::egress::{EgressError, EgressPool};
use crate::escalation::ManualEscalationQueue;
use crate::models::Post;
use crate::platform::{Platform, PlatformAdapter, UploadError, UploadRequest};
use crate::session::{SessionError, SessionStore};

/// Direct platform API call
pub struct ApiDirectStrategy {
    adapter: Arc<dyn PlatformAdapter>,
}

impl ApiDirectStrategy {
    /// Create the strategy over a platform adapter
    pub fn new(adapter: Arc<dyn PlatformAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl UploadStrategy for ApiDirectStrategy {
    fn name(&self) -> &'static str {
        "api_direct"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ApiDirect
    }

    async fn attempt(
        &self,
        post: &Post,
        _ctx: AttemptContext<'_>,
    ) -> Result<StrategyOutcome, StrategyError> {
        let request = UploadRequest::new(&post.content_ref, post.metadata.clone());
        let receipt = self.adapter.upload(&request).await?;
        Ok(StrategyOutcome::Posted(receipt))
    }
}

/// Platform API call through an acquired egress path
///
/// The handle is released on every exit path; the connection never outlives
/// the single upload attempt.
pub struct ApiViaEgressStrategy {
    adapter: Arc<dyn PlatformAdapter>,
    pool: Arc<EgressPool>,
}

impl ApiViaEgressStrategy {
    /// Create the strategy over an adapter and the egress pool
    pub fn new(adapter: Arc<dyn PlatformAdapter>, pool: Arc<EgressPool>) -> Self {
        Self { adapter, pool }
    }
}

#[async_trait]
impl UploadStrategy for ApiViaEgressStrategy {
    fn name(&self) -> &'static str {
        "api_via_egress"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ApiViaEgress
    }

    async fn attempt(
        &self,
        post: &Post,
        _ctx: AttemptContext<'_>,
    ) -> Result<StrategyOutcome, StrategyError> {
        let handle = match self.pool.acquire(self.adapter.platform()).await {
            Ok(handle) => handle,
            Err(e @ (EgressError::Exhausted | EgressError::NoPathsConfigured)) => {
                return Err(StrategyError::EgressUnavailable(e.to_string()))
            }
        };

        let request = UploadRequest::new(&post.content_ref, post.metadata.clone());
        let result = self.adapter.upload(&request).await;

        // Scoped release around the single attempt, success or not
        self.pool.release(handle).await;

        Ok(StrategyOutcome::Posted(result?))
    }
}

/// Replay of a stored authenticated session
///
/// Uses the interface the way a logged-in user would, driven by the stored
/// cookie/token blob. A missing session surfaces as an auth error so the
/// cascade applies its one refresh-and-retry.
pub struct SessionReplayStrategy {
    adapter: Arc<dyn PlatformAdapter>,
    sessions: Arc<SessionStore>,
}

impl SessionReplayStrategy {
    /// Create the strategy over an adapter and the session store
    pub fn new(adapter: Arc<dyn PlatformAdapter>, sessions: Arc<SessionStore>) -> Self {
        Self { adapter, sessions }
    }
}

#[async_trait]
impl UploadStrategy for SessionReplayStrategy {
    fn name(&self) -> &'static str {
        "session_replay"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::SessionReplay
    }

    async fn attempt(
        &self,
        post: &Post,
        _ctx: AttemptContext<'_>,
    ) -> Result<StrategyOutcome, StrategyError> {
        let platform = self.adapter.platform();

        let session = match self.sessions.get(platform).await {
            Ok(session) => session,
            Err(SessionError::Missing(_)) => {
                return Err(UploadError::auth("no replayable session stored").into())
            }
            Err(e) => return Err(UploadError::auth(e.to_string()).into()),
        };

        let request =
            UploadRequest::new(&post.content_ref, post.metadata.clone()).with_session(session);
        let receipt = self.adapter.upload(&request).await?;
        Ok(StrategyOutcome::Posted(receipt))
    }
}

/// Terminal hand-off to the manual escalation queue
///
/// Succeeds by construction: it records the escalation (durably) and the
/// full log of what automation already tried. Only a store failure can
/// surface, and that is fatal upstream rather than a strategy failure.
pub struct ManualFallbackStrategy {
    platform: Platform,
    escalations: Arc<ManualEscalationQueue>,
}

impl ManualFallbackStrategy {
    /// Create the strategy over the escalation queue
    pub fn new(platform: Platform, escalations: Arc<ManualEscalationQueue>) -> Self {
        Self {
            platform,
            escalations,
        }
    }
}

#[async_trait]
impl UploadStrategy for ManualFallbackStrategy {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ManualFallback
    }

    async fn attempt(
        &self,
        post: &Post,
        ctx: AttemptContext<'_>,
    ) -> Result<StrategyOutcome, StrategyError> {
        let record = self
            .escalations
            .add(&post.id, self.platform, ctx.prior_attempts.to_vec())
            .map_err(|e| StrategyError::Store(e.to_string()))?;

        Ok(StrategyOutcome::HandedOff {
            escalation_id: record.id,
        })
    }
}
