//! Upload orchestrator: the top-level coordination loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   dequeue_ready    ┌──────────────────────────┐
//! │ PriorityQueue│ ─────────────────▶ │  UploadOrchestrator      │
//! └──────────────┘                    │  - validation            │
//!        ▲  requeue on preemption     │  - preemption signalling │
//!        └─────────────────────────── │  - per-post task spawn   │
//!                                     └──────────┬───────────────┘
//!                                                │ fan-out per platform
//!                        ┌───────────────────────┼───────────────────────┐
//!                        ▼                       ▼                       ▼
//!                ┌──────────────┐        ┌──────────────┐        ┌──────────────┐
//!                │ platform lock│        │ platform lock│        │ platform lock│
//!                │ throttle gate│        │ throttle gate│        │ throttle gate│
//!                │   cascade    │        │   cascade    │        │   cascade    │
//!                └──────────────┘        └──────────────┘        └──────────────┘
//! ```
//!
//! One coordinating loop dequeues ready posts and spawns a task per post;
//! within a post, platforms run concurrently. A per-platform mutex is held
//! across the throttle wait and the cascade, so attempts to one platform
//! are strictly sequential and the spacing invariant holds across posts
//! regardless of dequeue order. The queue lock itself is never held across
//! any await on I/O.
//!
//! Store faults are fatal: the loop halts with a CRITICAL alert rather than
//! risk silently dropping posts.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::alerts::{AlertCondition, AlertDispatcher};
use crate::cascade::{CascadeOutcome, StrategyCascade};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::models::{
    DispatchStats, OutcomeResult, PlatformOutcome, Post, PostStatus, PriorityClass,
};
use crate::platform::Platform;
use crate::queue::{CancelToken, PostingThrottler, PriorityQueue};
use crate::storage::PostRepository;

/// Top-level coordinator for the distribution pipeline
pub struct UploadOrchestrator {
    queue: Arc<PriorityQueue>,
    throttler: Arc<PostingThrottler>,
    cascades: HashMap<Platform, Arc<StrategyCascade>>,
    repository: Arc<dyn PostRepository>,
    alerts: Arc<AlertDispatcher>,
    stats: Arc<DispatchStats>,
    config: OrchestratorConfig,

    /// One lock per platform: held across throttle wait + cascade so a
    /// platform never sees two concurrent attempts
    platform_locks: HashMap<Platform, Arc<tokio::sync::Mutex<()>>>,

    /// Consecutive failures per platform, across posts
    failure_streaks: Mutex<HashMap<Platform, u32>>,

    shutdown: watch::Sender<bool>,
}

impl UploadOrchestrator {
    /// Create an orchestrator over its collaborators
    pub fn new(
        queue: Arc<PriorityQueue>,
        throttler: Arc<PostingThrottler>,
        cascades: HashMap<Platform, Arc<StrategyCascade>>,
        repository: Arc<dyn PostRepository>,
        alerts: Arc<AlertDispatcher>,
        stats: Arc<DispatchStats>,
        config: OrchestratorConfig,
    ) -> Self {
        let platform_locks = Platform::all()
            .into_iter()
            .map(|p| (p, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            queue,
            throttler,
            cascades,
            repository,
            alerts,
            stats,
            config,
            platform_locks,
            failure_streaks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Ask the run loop to stop dequeuing and drain in-flight work
    pub fn request_shutdown(&self) {
        // send_replace updates the value even before the loop subscribes
        self.shutdown.send_replace(true);
    }

    /// Long-lived coordination loop
    ///
    /// Returns `Ok(())` on graceful shutdown. Returns an error only for
    /// infrastructure faults (store unavailable) that make continuing
    /// unsafe; everything below that is handled inside the cascades.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        tracing::info!(
            platforms = self.cascades.len(),
            poll_interval_secs = self.config.poll_interval_secs,
            "orchestrator loop started"
        );

        let mut fatal: Option<Error> = None;

        while fatal.is_none() && !*shutdown.borrow() {
            // Reap finished post tasks; a store fault halts dequeuing
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = Self::unwrap_task(joined) {
                    break_on_store_fault(&self.alerts, &e);
                    fatal = Some(e);
                }
            }
            if fatal.is_some() {
                break;
            }

            self.check_backlog().await;

            match self.queue.dequeue_ready().await {
                Some((post, cancel)) => {
                    self.stats
                        .dispatched
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                    if post.priority.preempts() {
                        let signalled = self.queue.preempt(&post.id).await;
                        self.stats
                            .preempted
                            .fetch_add(signalled as u64, std::sync::atomic::Ordering::Relaxed);
                    }

                    let orchestrator = Arc::clone(&self);
                    tasks.spawn(async move { orchestrator.handle_post(post, cancel).await });
                }
                None => {
                    let sleep = tokio::time::sleep(Duration::from_secs(
                        self.config.poll_interval_secs,
                    ));
                    tokio::select! {
                        _ = sleep => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        // Drain in-flight posts cooperatively; never abort an external call
        tracing::info!(in_flight = tasks.len(), "orchestrator draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = Self::unwrap_task(joined) {
                break_on_store_fault(&self.alerts, &e);
                fatal.get_or_insert(e);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unwrap_task(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
        match joined {
            Ok(result) => result,
            Err(e) => Err(Error::other(format!("post task panicked: {e}"))),
        }
    }

    /// Raise the backlog alert when the oldest queued post has waited too long
    async fn check_backlog(&self) {
        if let Some(age) = self.queue.oldest_waiting_age().await {
            let threshold = self.config.backlog_alert_minutes;
            if age.num_minutes() >= threshold {
                self.alerts.notify(
                    AlertCondition::QueueBacklog {
                        oldest_age_minutes: age.num_minutes(),
                        threshold_minutes: threshold,
                    },
                    "queue backlog exceeds configured age threshold",
                );
            }
        }
    }

    /// Run one post to a terminal state (or back into the queue)
    async fn handle_post(&self, mut post: Post, cancel: CancelToken) -> Result<()> {
        if let Err(reason) = self.validate(&post) {
            tracing::warn!(post_id = %post.id, %reason, "post rejected by validation");
            post.status = PostStatus::Failed;
            for platform in post.platforms.clone() {
                post.record_outcome(PlatformOutcome {
                    platform,
                    outcome: OutcomeResult::Rejected {
                        reason: reason.clone(),
                    },
                    attempts: Vec::new(),
                    recorded_at: Utc::now(),
                    retry_count: post.next_retry_count(platform),
                });
            }
            self.repository.save_post(&post)?;
            self.queue.complete(&post.id).await;
            self.stats
                .failed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(());
        }

        post.status = PostStatus::InProgress;
        if post.content_fingerprint.is_none() {
            post.compute_fingerprint();
        }
        self.repository.save_post(&post)?;

        // Fan out one cascade per platform that has not succeeded yet
        let remaining = post.remaining_platforms();
        tracing::info!(
            post_id = %post.id,
            priority = %post.priority,
            platforms = ?remaining,
            attempt = post.attempts,
            "dispatching post"
        );

        let runs = remaining.iter().map(|&platform| {
            let post_ref = &post;
            let cancel = cancel.clone();
            async move { (platform, self.run_platform(platform, post_ref, cancel).await) }
        });
        let results: Vec<(Platform, CascadeOutcome)> = join_all(runs).await;

        // Record terminal outcomes first so a preemption requeue preserves
        // the platforms that already succeeded
        let mut cancelled = false;
        for (platform, outcome) in results {
            let retry_count = post.next_retry_count(platform);
            match outcome {
                CascadeOutcome::Succeeded {
                    receipt,
                    strategy,
                    strategy_index,
                    attempts,
                } => {
                    self.note_platform_result(platform, true);
                    post.record_outcome(PlatformOutcome {
                        platform,
                        outcome: OutcomeResult::Succeeded {
                            strategy,
                            strategy_index,
                            external_id: receipt.external_id,
                        },
                        attempts,
                        recorded_at: Utc::now(),
                        retry_count,
                    });
                }
                CascadeOutcome::Escalated {
                    escalation_id,
                    attempts,
                } => {
                    self.note_platform_result(platform, false);
                    post.record_outcome(PlatformOutcome {
                        platform,
                        outcome: OutcomeResult::Escalated { escalation_id },
                        attempts,
                        recorded_at: Utc::now(),
                        retry_count,
                    });
                }
                CascadeOutcome::Rejected { reason } => {
                    post.record_outcome(PlatformOutcome {
                        platform,
                        outcome: OutcomeResult::Rejected { reason },
                        attempts: Vec::new(),
                        recorded_at: Utc::now(),
                        retry_count,
                    });
                }
                // No outcome record for a cancelled attempt
                CascadeOutcome::Cancelled => cancelled = true,
                CascadeOutcome::StoreFault { detail } => {
                    return Err(Error::store(detail));
                }
            }
        }

        if cancelled {
            // Lossless preemption: back into the queue, succeeded platform
            // outcomes intact
            post.status = PostStatus::Pending;
            self.repository.save_post(&post)?;
            if self.queue.requeue_preempted(post).await {
                self.stats
                    .requeued
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            return Ok(());
        }

        post.status = post.derive_status();
        self.repository.save_post(&post)?;
        self.queue.complete(&post.id).await;

        match post.status {
            PostStatus::Completed => {
                self.stats
                    .completed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            PostStatus::Escalated => {
                self.stats
                    .escalated
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            _ => {
                self.stats
                    .failed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        tracing::info!(post_id = %post.id, status = %post.status, "post finished");
        Ok(())
    }

    /// Fail-fast validation before any platform work
    fn validate(&self, post: &Post) -> std::result::Result<(), String> {
        if post.platforms.is_empty() {
            return Err("post has no target platforms".to_string());
        }
        if post.content_ref.trim().is_empty() {
            return Err("content reference is empty".to_string());
        }
        for platform in &post.platforms {
            if !self.cascades.contains_key(platform) {
                return Err(format!("no cascade configured for platform {platform}"));
            }
        }
        Ok(())
    }

    /// One platform's gate-wait plus cascade, serialized per platform
    async fn run_platform(
        &self,
        platform: Platform,
        post: &Post,
        cancel: CancelToken,
    ) -> CascadeOutcome {
        let lock = Arc::clone(
            self.platform_locks
                .get(&platform)
                .expect("platform lock missing"),
        );
        let _guard = lock.lock().await;

        if let Some(outcome) = self.wait_for_throttle(platform, post.priority, &cancel).await {
            return outcome;
        }

        let cascade = self
            .cascades
            .get(&platform)
            .expect("cascade presence checked in validate");
        let outcome = cascade.execute(post, &cancel).await;

        if let CascadeOutcome::Succeeded { receipt, .. } = &outcome {
            // The spacing clock records every success, breaking included
            if let Err(e) = self
                .throttler
                .record_post(platform, receipt.posted_at, post.priority)
                .await
            {
                return CascadeOutcome::StoreFault {
                    detail: e.to_string(),
                };
            }
        }

        outcome
    }

    /// Sleep until the throttler allows this post; `Some` short-circuits
    ///
    /// The deliberate throttle wait is a safe cancellation point.
    async fn wait_for_throttle(
        &self,
        platform: Platform,
        priority: PriorityClass,
        cancel: &CancelToken,
    ) -> Option<CascadeOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Some(CascadeOutcome::Cancelled);
            }
            if self.throttler.may_post_now(platform, priority).await {
                return None;
            }

            let next_allowed = self.throttler.next_allowed_time(platform).await;
            let wait = (next_allowed - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tracing::debug!(
                %platform,
                %priority,
                wait_secs = wait.as_secs(),
                "throttled, waiting for spacing interval"
            );

            let mut cancel_wait = cancel.clone();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_wait.cancelled() => return Some(CascadeOutcome::Cancelled),
            }
        }
    }

    /// Track per-platform failure streaks and raise the HIGH alert
    fn note_platform_result(&self, platform: Platform, success: bool) {
        let mut streaks = self.failure_streaks.lock().expect("streak mutex poisoned");
        let count = streaks.entry(platform).or_insert(0);

        if success {
            *count = 0;
            return;
        }

        *count += 1;
        if *count >= self.config.consecutive_failure_threshold {
            self.alerts.notify(
                AlertCondition::ConsecutiveFailures {
                    platform,
                    count: *count,
                },
                format!("{platform} keeps failing across posts"),
            );
        }
    }
}

/// CRITICAL alert when the durable store rejects orchestrator writes
fn break_on_store_fault(alerts: &AlertDispatcher, error: &Error) {
    tracing::error!(error = %error, "orchestrator halting on infrastructure fault");
    alerts.notify(
        AlertCondition::StoreUnavailable {
            detail: error.to_string(),
        },
        "orchestrator halted: durable store unavailable",
    );
}
