// Core data structures for the nalgae distribution orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::platform::Platform;

/// Priority class of a post, ordered by urgency
///
/// The declaration order is the queue sort order: `Breaking` sorts first.
/// Only `Breaking` posts preempt in-flight work and bypass posting spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Breaking news, dispatched immediately; preempts non-breaking work
    Breaking,
    /// Urgent content, ahead of routine posting
    Urgent,
    /// Routine posting
    Normal,
    /// Pre-scheduled content, lowest urgency
    Scheduled,
}

impl PriorityClass {
    /// Whether dispatching this class preempts in-flight lower-priority work
    pub fn preempts(&self) -> bool {
        matches!(self, Self::Breaking)
    }

    /// Whether this class bypasses the posting throttle gate
    pub fn bypasses_throttle(&self) -> bool {
        matches!(self, Self::Breaking)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breaking => "breaking",
            Self::Urgent => "urgent",
            Self::Normal => "normal",
            Self::Scheduled => "scheduled",
        }
    }

    /// Create from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "breaking" => Some(Self::Breaking),
            "urgent" => Some(Self::Urgent),
            "normal" => Some(Self::Normal),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }

    /// Get all classes in sort order
    pub fn all() -> Vec<Self> {
        vec![Self::Breaking, Self::Urgent, Self::Normal, Self::Scheduled]
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Queued, not yet dispatched
    Pending,
    /// Dispatched, cascades running
    InProgress,
    /// Every target platform has a successful outcome
    Completed,
    /// Rejected before dispatch (caller error)
    Failed,
    /// At least one platform reached manual escalation, none still pending
    Escalated,
}

impl PostStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Escalated)
    }
}

impl std::str::FromStr for PostStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "escalated" => Self::Escalated,
            _ => Self::Failed,
        })
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptive metadata attached to a post
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl PostMetadata {
    /// Create metadata with a title only
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// One failed strategy attempt within a cascade run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    /// Strategy name (e.g. "api_direct")
    pub strategy: String,
    /// Failure detail
    pub error: String,
    /// When the attempt failed
    pub at: DateTime<Utc>,
}

/// Terminal result of one cascade run for one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OutcomeResult {
    /// A strategy succeeded; the platform accepted the upload
    Succeeded {
        strategy: String,
        strategy_index: usize,
        external_id: String,
    },
    /// All automated strategies exhausted; handed to the manual queue
    Escalated { escalation_id: String },
    /// The post itself was invalid for this platform (caller error)
    Rejected { reason: String },
}

/// Per-(post, platform) outcome record
///
/// Finalized at terminal state and immutable thereafter; a retry appends a
/// new record with an incremented `retry_count` instead of mutating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub outcome: OutcomeResult,
    /// Every strategy that failed before the terminal transition
    pub attempts: Vec<StrategyAttempt>,
    pub recorded_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PlatformOutcome {
    /// Whether this record is a platform success
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, OutcomeResult::Succeeded { .. })
    }

    /// Whether this record is an escalation hand-off
    pub fn is_escalated(&self) -> bool {
        matches!(self.outcome, OutcomeResult::Escalated { .. })
    }
}

/// A unit of distribution work: one piece of content, many target platforms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Unique post id
    pub id: String,

    /// Target platforms, in caller-given order
    pub platforms: Vec<Platform>,

    /// Opaque content reference (path or blob handle)
    pub content_ref: String,

    /// Title, description, tags
    pub metadata: PostMetadata,

    /// Desired schedule time; absent means "as soon as throttling allows"
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Priority class
    pub priority: PriorityClass,

    /// Lifecycle status
    pub status: PostStatus,

    /// Append-only per-platform outcome records
    pub outcomes: Vec<PlatformOutcome>,

    /// Dispatch attempt counter, incremented on preemption requeue
    pub attempts: u32,

    /// When the post was created
    pub created_at: DateTime<Utc>,

    /// SHA256 fingerprint of the content reference, for duplicate spotting
    pub content_fingerprint: Option<String>,
}

impl Post {
    /// Create a new pending post with a fresh id
    pub fn new(
        content_ref: impl Into<String>,
        metadata: PostMetadata,
        platforms: Vec<Platform>,
        priority: PriorityClass,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platforms,
            content_ref: content_ref.into(),
            metadata,
            scheduled_at: None,
            priority,
            status: PostStatus::Pending,
            outcomes: Vec::new(),
            attempts: 0,
            created_at: Utc::now(),
            content_fingerprint: None,
        }
    }

    /// Set a desired schedule time
    pub fn with_schedule(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Compute and attach the content fingerprint
    pub fn compute_fingerprint(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.content_ref.as_bytes());
        self.content_fingerprint = Some(format!("{:x}", hasher.finalize()));
    }

    /// Latest outcome record for a platform, if any
    pub fn current_outcome(&self, platform: Platform) -> Option<&PlatformOutcome> {
        self.outcomes.iter().rev().find(|o| o.platform == platform)
    }

    /// Whether the platform already has a successful outcome
    pub fn succeeded_on(&self, platform: Platform) -> bool {
        self.current_outcome(platform)
            .map(PlatformOutcome::is_success)
            .unwrap_or(false)
    }

    /// Target platforms without a successful outcome yet
    pub fn remaining_platforms(&self) -> Vec<Platform> {
        self.platforms
            .iter()
            .copied()
            .filter(|p| !self.succeeded_on(*p))
            .collect()
    }

    /// Append an outcome record
    pub fn record_outcome(&mut self, outcome: PlatformOutcome) {
        self.outcomes.push(outcome);
    }

    /// Retry count for the next cascade run on a platform
    pub fn next_retry_count(&self, platform: Platform) -> u32 {
        self.current_outcome(platform)
            .map(|o| o.retry_count + 1)
            .unwrap_or(0)
    }

    /// Derive the overall status from per-platform outcomes
    ///
    /// `Completed` iff every target platform succeeded; `Escalated` iff at
    /// least one platform escalated and none are still unresolved.
    pub fn derive_status(&self) -> PostStatus {
        if self.platforms.iter().all(|p| self.succeeded_on(*p)) {
            return PostStatus::Completed;
        }

        let mut any_escalated = false;
        for platform in &self.platforms {
            match self.current_outcome(*platform) {
                Some(o) if o.is_escalated() => any_escalated = true,
                Some(_) => {}
                // A platform with no terminal record is still unresolved
                None => return PostStatus::InProgress,
            }
        }

        if any_escalated {
            PostStatus::Escalated
        } else {
            PostStatus::Failed
        }
    }
}

/// Dispatch counters (thread-safe)
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Posts accepted into the queue
    pub enqueued: AtomicU64,

    /// Posts handed to cascades
    pub dispatched: AtomicU64,

    /// Posts that completed on every platform
    pub completed: AtomicU64,

    /// Posts that ended escalated
    pub escalated: AtomicU64,

    /// Posts rejected by validation
    pub failed: AtomicU64,

    /// Preemption signals fired
    pub preempted: AtomicU64,

    /// Posts cancelled mid-flight and requeued
    pub requeued: AtomicU64,
}

impl DispatchStats {
    /// Create a shared stats counter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            preempted: self.preempted.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub escalated: u64,
    pub failed: u64,
    pub preempted: u64,
    pub requeued: u64,
}

impl StatsSnapshot {
    /// Completion rate over dispatched posts (0.0 - 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.dispatched == 0 {
            return 1.0;
        }
        self.completed as f64 / self.dispatched as f64
    }
}
