//! Cascading-fallback upload engine
//!
//! Per platform, an ordered list of upload strategies is tried until one
//! succeeds. The state machine per run is
//! `NotStarted → Attempting(i) → {Succeeded | Attempting(i+1) | Exhausted}`,
//! with the manual hand-off as the terminal strategy — a cascade never ends
//! without either a platform success or a durable escalation record.
//!
//! Error handling within one strategy:
//! - network errors retry with exponential backoff (1s/2s/4s, jittered)
//! - an auth error triggers one session refresh, then one more try
//! - a rate limit pauses this platform's cascade until the reported reset
//!   (it neither consumes the retry budget nor advances the strategy)
//! - a validation error aborts the whole cascade: it is a caller error
//! - egress exhaustion means "this strategy unavailable", never an upload
//!   failure
//!
//! Cancellation is cooperative and observed only at strategy boundaries and
//! inside deliberate waits; an external call is never interrupted.

pub mod strategies;

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertCondition, AlertDispatcher};
use crate::models::{Post, StrategyAttempt};
use crate::platform::{Platform, UploadError, UploadReceipt};
use crate::queue::CancelToken;
use crate::session::SessionStore;

pub use strategies::{
    ApiDirectStrategy, ApiViaEgressStrategy, ManualFallbackStrategy, SessionReplayStrategy,
};

/// Strategy kinds, in the usual fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Direct platform API call
    ApiDirect,
    /// Platform API call through an acquired egress path
    ApiViaEgress,
    /// Replay of a stored authenticated session
    SessionReplay,
    /// Hand-off to the manual escalation queue (terminal, cannot fail)
    ManualFallback,
}

impl StrategyKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiDirect => "api_direct",
            Self::ApiViaEgress => "api_via_egress",
            Self::SessionReplay => "session_replay",
            Self::ManualFallback => "manual",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Context handed to a strategy attempt
pub struct AttemptContext<'a> {
    /// Failed attempts from earlier strategies in this run
    pub prior_attempts: &'a [StrategyAttempt],
    /// Which cascade run this is for the (post, platform) pair
    pub retry_count: u32,
}

/// What one strategy attempt produced
#[derive(Debug)]
pub enum StrategyOutcome {
    /// The platform accepted the upload
    Posted(UploadReceipt),
    /// The work was durably handed to the manual queue
    HandedOff { escalation_id: String },
}

/// Errors from a strategy attempt
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// Typed failure from the platform adapter
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// No egress path available; the strategy is unavailable, not failed
    #[error("egress unavailable: {0}")]
    EgressUnavailable(String),

    /// The durable store rejected a write (fatal upstream)
    #[error("store error: {0}")]
    Store(String),
}

/// One upload strategy for one platform
#[async_trait::async_trait]
pub trait UploadStrategy: Send + Sync {
    /// Strategy name for logs and attempt records
    fn name(&self) -> &'static str;

    /// Strategy kind
    fn kind(&self) -> StrategyKind;

    /// Try to get the post onto the platform
    async fn attempt(
        &self,
        post: &Post,
        ctx: AttemptContext<'_>,
    ) -> Result<StrategyOutcome, StrategyError>;
}

/// Terminal result of one cascade run
#[derive(Debug)]
pub enum CascadeOutcome {
    /// A strategy succeeded
    Succeeded {
        receipt: UploadReceipt,
        strategy: String,
        strategy_index: usize,
        attempts: Vec<StrategyAttempt>,
    },
    /// Automated strategies exhausted; escalation record created
    Escalated {
        escalation_id: String,
        attempts: Vec<StrategyAttempt>,
    },
    /// The post is invalid for this platform (caller error, no escalation)
    Rejected { reason: String },
    /// Cancelled cooperatively at a safe checkpoint; no outcome recorded
    Cancelled,
    /// The durable store failed mid-cascade; fatal to the orchestrator
    StoreFault { detail: String },
}

/// Cascade tuning knobs
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Transient retries per strategy
    pub max_transient_retries: u32,

    /// Base backoff delay, doubled per retry
    pub backoff_base: Duration,

    /// Rate-limit pause when the platform reports no reset time
    pub rate_limit_fallback: Duration,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            backoff_base: Duration::from_secs(1),
            rate_limit_fallback: Duration::from_secs(45 * 60),
        }
    }
}

/// Ordered fallback strategies for one platform
pub struct StrategyCascade {
    platform: Platform,
    strategies: Vec<Arc<dyn UploadStrategy>>,
    sessions: Arc<SessionStore>,
    alerts: Arc<AlertDispatcher>,
    config: CascadeConfig,
}

impl StrategyCascade {
    /// Create a cascade with an explicit strategy order
    pub fn new(
        platform: Platform,
        strategies: Vec<Arc<dyn UploadStrategy>>,
        sessions: Arc<SessionStore>,
        alerts: Arc<AlertDispatcher>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            platform,
            strategies,
            sessions,
            alerts,
            config,
        }
    }

    /// Platform this cascade uploads to
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Run the cascade for a post
    ///
    /// Always terminates in `Succeeded`, `Escalated`, `Rejected`,
    /// `Cancelled`, or `StoreFault` — there is no silent drop.
    pub async fn execute(&self, post: &Post, cancel: &CancelToken) -> CascadeOutcome {
        let mut attempts: Vec<StrategyAttempt> = Vec::new();
        let retry_count = post.next_retry_count(self.platform);

        for (index, strategy) in self.strategies.iter().enumerate() {
            // Strategy boundary: the only place cancellation takes effect
            if cancel.is_cancelled() {
                tracing::info!(
                    post_id = %post.id,
                    platform = %self.platform,
                    "cascade cancelled at strategy boundary"
                );
                return CascadeOutcome::Cancelled;
            }

            tracing::debug!(
                post_id = %post.id,
                platform = %self.platform,
                strategy = strategy.name(),
                index,
                "attempting strategy"
            );

            match self
                .run_strategy(strategy.as_ref(), post, &attempts, retry_count, cancel)
                .await
            {
                StrategyRun::Posted(receipt) => {
                    tracing::info!(
                        post_id = %post.id,
                        platform = %self.platform,
                        strategy = strategy.name(),
                        external_id = %receipt.external_id,
                        "upload succeeded"
                    );
                    return CascadeOutcome::Succeeded {
                        receipt,
                        strategy: strategy.name().to_string(),
                        strategy_index: index,
                        attempts,
                    };
                }
                StrategyRun::HandedOff { escalation_id } => {
                    self.alerts
                        .notify(
                            AlertCondition::StrategiesExhausted {
                                platform: self.platform,
                                post_id: post.id.clone(),
                            },
                            format!(
                                "all automated strategies exhausted for {} on {}; escalated as {}",
                                post.id, self.platform, escalation_id
                            ),
                        );
                    return CascadeOutcome::Escalated {
                        escalation_id,
                        attempts,
                    };
                }
                StrategyRun::Rejected { reason } => {
                    tracing::warn!(
                        post_id = %post.id,
                        platform = %self.platform,
                        %reason,
                        "post rejected as invalid, aborting cascade"
                    );
                    return CascadeOutcome::Rejected { reason };
                }
                StrategyRun::Cancelled => return CascadeOutcome::Cancelled,
                StrategyRun::StoreFault { detail } => {
                    return CascadeOutcome::StoreFault { detail }
                }
                StrategyRun::Exhausted { error } => {
                    attempts.push(StrategyAttempt {
                        strategy: strategy.name().to_string(),
                        error,
                        at: Utc::now(),
                    });
                }
            }
        }

        // The configured order always ends in the manual fall-back, so this
        // is only reachable with a misconfigured (manual-less) cascade
        tracing::error!(
            post_id = %post.id,
            platform = %self.platform,
            "cascade ran out of strategies without a manual fall-back"
        );
        CascadeOutcome::StoreFault {
            detail: format!("no manual fall-back configured for {}", self.platform),
        }
    }

    /// Run one strategy to its local terminal state
    async fn run_strategy(
        &self,
        strategy: &dyn UploadStrategy,
        post: &Post,
        prior_attempts: &[StrategyAttempt],
        retry_count: u32,
        cancel: &CancelToken,
    ) -> StrategyRun {
        let mut transient_retries = 0u32;
        let mut auth_refreshed = false;

        loop {
            let ctx = AttemptContext {
                prior_attempts,
                retry_count,
            };

            let error = match strategy.attempt(post, ctx).await {
                Ok(StrategyOutcome::Posted(receipt)) => return StrategyRun::Posted(receipt),
                Ok(StrategyOutcome::HandedOff { escalation_id }) => {
                    return StrategyRun::HandedOff { escalation_id }
                }
                Err(e) => e,
            };

            match error {
                StrategyError::Store(detail) => return StrategyRun::StoreFault { detail },

                StrategyError::EgressUnavailable(detail) => {
                    self.alerts.notify(
                        AlertCondition::EgressPoolExhausted {
                            platform: self.platform,
                        },
                        format!("egress unavailable for {}: {detail}", self.platform),
                    );
                    return StrategyRun::Exhausted {
                        error: format!("egress unavailable: {detail}"),
                    };
                }

                StrategyError::Upload(UploadError::Validation { detail }) => {
                    return StrategyRun::Rejected { reason: detail }
                }

                StrategyError::Upload(UploadError::Network { detail })
                    if transient_retries < self.config.max_transient_retries =>
                {
                    transient_retries += 1;
                    let delay = self.backoff_delay(transient_retries);
                    tracing::debug!(
                        platform = %self.platform,
                        strategy = strategy.name(),
                        retry = transient_retries,
                        delay_ms = delay.as_millis() as u64,
                        %detail,
                        "transient error, backing off"
                    );
                    if self.interruptible_sleep(delay, cancel).await {
                        return StrategyRun::Cancelled;
                    }
                }

                StrategyError::Upload(UploadError::Auth { detail }) if !auth_refreshed => {
                    auth_refreshed = true;
                    tracing::info!(
                        platform = %self.platform,
                        %detail,
                        "auth error, refreshing session"
                    );
                    if let Err(e) = self.sessions.refresh(self.platform).await {
                        return self.strategy_failed(
                            strategy,
                            format!("auth failed and refresh failed: {e}"),
                        );
                    }
                    // Fall through to one more attempt with the new session
                }

                StrategyError::Upload(UploadError::RateLimit { retry_after_secs }) => {
                    let pause = retry_after_secs
                        .map(Duration::from_secs)
                        .unwrap_or(self.config.rate_limit_fallback);
                    self.alerts.notify(
                        AlertCondition::RateLimited {
                            platform: self.platform,
                            retry_after_secs,
                        },
                        format!("{} rate limited, pausing cascade", self.platform),
                    );
                    tracing::warn!(
                        platform = %self.platform,
                        pause_secs = pause.as_secs(),
                        "rate limited, pausing this platform's cascade"
                    );
                    // Pauses this platform only; does not consume the retry
                    // budget and does not advance to the next strategy
                    if self.interruptible_sleep(pause, cancel).await {
                        return StrategyRun::Cancelled;
                    }
                }

                StrategyError::Upload(err) => {
                    return self.strategy_failed(strategy, err.to_string());
                }
            }
        }
    }

    /// Record a strategy-level failure and raise the MEDIUM alert
    fn strategy_failed(&self, strategy: &dyn UploadStrategy, error: String) -> StrategyRun {
        self.alerts.notify(
            AlertCondition::StrategyFailure {
                platform: self.platform,
                strategy: strategy.name().to_string(),
            },
            format!("{} failed on {}: {error}", strategy.name(), self.platform),
        );
        StrategyRun::Exhausted { error }
    }

    /// Backoff delay for the nth transient retry, with ±10% jitter
    fn backoff_delay(&self, retry: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let delay = base.saturating_mul(2_u64.pow(retry.saturating_sub(1)));
        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        Duration::from_millis((delay as f64 * jitter) as u64)
    }

    /// Sleep that wakes early on cancellation; true means cancelled
    ///
    /// Waits are safe cancellation points: nothing external is in flight.
    async fn interruptible_sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let mut cancel = cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = cancel.cancelled() => true,
        }
    }
}

/// Local terminal state of one strategy run
enum StrategyRun {
    Posted(UploadReceipt),
    HandedOff { escalation_id: String },
    Rejected { reason: String },
    Cancelled,
    StoreFault { detail: String },
    /// This strategy is done; the cascade advances
    Exhausted { error: String },
}
