//! Alerting for distribution failures and anomalies
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      AlertDispatcher                       │
//! │  - Condition → severity mapping            │
//! │  - Deduplication window                    │
//! │  - Bounded fire-and-forget fan-out         │
//! └────────────────────────────────────────────┘
//!                     │
//!         ┌───────────┼───────────┐
//!         ▼           ▼           ▼
//!   ┌─────────┐ ┌─────────┐ ┌─────────┐
//!   │ Webhook │ │  Chat   │ │  Email  │
//!   │ Channel │ │ Channel │ │ Channel │
//!   └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! Dispatch is structurally incapable of blocking an upload: `notify`
//! spawns detached sender tasks (bounded by a semaphore) and returns
//! immediately; a channel failing to deliver is logged and nothing more.

pub mod channels;
mod dispatcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::platform::Platform;

pub use channels::webhook::WebhookChannel;
pub use channels::Channel;
pub use dispatcher::AlertDispatcher;

/// Severity level of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Requires immediate operator action
    Critical,
    /// Requires attention soon
    High,
    /// Noteworthy, no action expected
    Medium,
}

impl AlertSeverity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conditions that raise alerts, each with a fixed severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Every automated strategy failed for one platform; manual hand-off made
    StrategiesExhausted { platform: Platform, post_id: String },

    /// No egress path passed verification
    EgressPoolExhausted { platform: Platform },

    /// The durable store rejected a read or write
    StoreUnavailable { detail: String },

    /// Repeated failures on one platform across posts
    ConsecutiveFailures { platform: Platform, count: u32 },

    /// The oldest queued post has waited past the configured threshold
    QueueBacklog {
        oldest_age_minutes: i64,
        threshold_minutes: i64,
    },

    /// A platform reported rate limiting
    RateLimited {
        platform: Platform,
        retry_after_secs: Option<u64>,
    },

    /// A single strategy failed (cascade continues)
    StrategyFailure { platform: Platform, strategy: String },
}

impl AlertCondition {
    /// Fixed severity of the condition
    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::StrategiesExhausted { .. }
            | Self::EgressPoolExhausted { .. }
            | Self::StoreUnavailable { .. } => AlertSeverity::Critical,
            Self::ConsecutiveFailures { .. } | Self::QueueBacklog { .. } => AlertSeverity::High,
            Self::RateLimited { .. } | Self::StrategyFailure { .. } => AlertSeverity::Medium,
        }
    }

    /// Stable type label, used as the deduplication key prefix
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::StrategiesExhausted { .. } => "strategies_exhausted",
            Self::EgressPoolExhausted { .. } => "egress_pool_exhausted",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::ConsecutiveFailures { .. } => "consecutive_failures",
            Self::QueueBacklog { .. } => "queue_backlog",
            Self::RateLimited { .. } => "rate_limited",
            Self::StrategyFailure { .. } => "strategy_failure",
        }
    }

    /// Get a human-readable description of the condition
    pub fn description(&self) -> String {
        match self {
            Self::StrategiesExhausted { platform, post_id } => {
                format!("all upload strategies exhausted for {platform} (post {post_id})")
            }
            Self::EgressPoolExhausted { platform } => {
                format!("egress pool exhausted while reaching {platform}")
            }
            Self::StoreUnavailable { detail } => {
                format!("durable store unavailable: {detail}")
            }
            Self::ConsecutiveFailures { platform, count } => {
                format!("{count} consecutive failures on {platform}")
            }
            Self::QueueBacklog {
                oldest_age_minutes,
                threshold_minutes,
            } => {
                format!(
                    "oldest queued post waiting {oldest_age_minutes}min (threshold {threshold_minutes}min)"
                )
            }
            Self::RateLimited {
                platform,
                retry_after_secs,
            } => match retry_after_secs {
                Some(secs) => format!("{platform} rate limited, reset in {secs}s"),
                None => format!("{platform} rate limited, no reset reported"),
            },
            Self::StrategyFailure { platform, strategy } => {
                format!("strategy '{strategy}' failed for {platform}")
            }
        }
    }
}

/// An alert instance with context metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier
    pub id: String,
    /// Condition that raised this alert
    pub condition: AlertCondition,
    /// Severity, derived from the condition
    pub severity: AlertSeverity,
    /// Alert message
    pub message: String,
    /// Additional context
    pub context: HashMap<String, String>,
    /// When the alert was raised
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Create an alert for a condition
    pub fn new(condition: AlertCondition, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity: condition.severity(),
            condition,
            message: message.into(),
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Format alert for plain-text channels
    pub fn format_message(&self) -> String {
        format!(
            "[{severity}] {message}\nCondition: {condition}\nRaised: {created}",
            severity = self.severity.as_str().to_uppercase(),
            message = self.message,
            condition = self.condition.description(),
            created = self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}
