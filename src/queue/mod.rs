//! Priority-aware post queue with preemption
//!
//! The queue is the single shared mutable structure between the producer
//! path, the orchestrator's dequeue, and preemption requeue. All mutations
//! go through one `tokio::sync::Mutex`; the lock is held only to move
//! entries, never across I/O.
//!
//! Ordering is deterministic: `(priority class, effective time, insertion
//! sequence)`. The effective time of an unscheduled post is its enqueue
//! time, so unscheduled posts sort as "now" and FIFO within a class.
//!
//! Preemption is cooperative: dispatching registers the post in an in-flight
//! table and receives a [`CancelToken`]; `preempt` fires the token of every
//! non-breaking in-flight entry, and `requeue_preempted` returns a cancelled
//! post to the queue exactly once, attempt counter incremented.

pub mod throttle;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::models::{Post, PriorityClass};

pub use throttle::PostingThrottler;

/// Errors from queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A post with this id is already queued or in flight
    #[error("duplicate post id: {0}")]
    Duplicate(String),
}

/// Cooperative cancellation signal for one dispatched post
///
/// Checked (or awaited) at strategy boundaries only; cancellation never
/// interrupts an external call mid-flight.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps a detached token's channel alive
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// Create a token that never fires (for tests and direct cascade runs)
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested
    ///
    /// Never resolves if the dispatch side goes away without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Deterministic queue position
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    priority: PriorityClass,
    effective_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug)]
struct QueueEntry {
    post: Post,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct InFlightEntry {
    priority: PriorityClass,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueInner {
    entries: BTreeMap<OrderKey, QueueEntry>,
    /// Ids of queued and in-flight posts (idempotency guard)
    ids: HashSet<String>,
    in_flight: HashMap<String, InFlightEntry>,
    seq: u64,
}

/// Priority queue of pending posts
#[derive(Default)]
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
}

impl PriorityQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a post
    ///
    /// Rejects a post whose id is already queued or in flight; the second
    /// enqueue is a no-op on queue state.
    pub async fn enqueue(&self, post: Post) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;

        if inner.ids.contains(&post.id) {
            return Err(QueueError::Duplicate(post.id.clone()));
        }

        let now = Utc::now();
        let key = OrderKey {
            priority: post.priority,
            effective_at: post.scheduled_at.unwrap_or(now),
            seq: inner.seq,
        };
        inner.seq += 1;
        inner.ids.insert(post.id.clone());

        tracing::debug!(
            post_id = %post.id,
            priority = %post.priority,
            scheduled_at = ?post.scheduled_at,
            "post enqueued"
        );

        inner.entries.insert(
            key,
            QueueEntry {
                post,
                enqueued_at: now,
            },
        );
        Ok(())
    }

    /// Dequeue the highest-priority post whose schedule time has arrived
    ///
    /// The returned post is registered in the in-flight table in the same
    /// critical section; the paired [`CancelToken`] is how preemption
    /// reaches it. Returns `None` when nothing is ready (caller polls).
    pub async fn dequeue_ready(&self) -> Option<(Post, CancelToken)> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let key = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.post.scheduled_at.map_or(true, |t| t <= now))
            .map(|(key, _)| key.clone())?;

        let entry = inner.entries.remove(&key).expect("key just observed");
        let (tx, rx) = watch::channel(false);
        inner.in_flight.insert(
            entry.post.id.clone(),
            InFlightEntry {
                priority: entry.post.priority,
                cancel: tx,
            },
        );

        Some((
            entry.post,
            CancelToken {
                rx,
                _keepalive: None,
            },
        ))
    }

    /// Signal every in-flight non-breaking operation to cancel
    ///
    /// Invoked when a breaking post is dispatched. Returns the number of
    /// operations signalled. The preempting post itself is never signalled.
    pub async fn preempt(&self, preempting_post_id: &str) -> usize {
        let inner = self.inner.lock().await;

        let mut signalled = 0;
        for (id, entry) in &inner.in_flight {
            if id == preempting_post_id || entry.priority.preempts() {
                continue;
            }
            if entry.cancel.send(true).is_ok() {
                signalled += 1;
            }
        }

        if signalled > 0 {
            tracing::info!(
                by = %preempting_post_id,
                count = signalled,
                "preemption signalled to in-flight posts"
            );
        }
        signalled
    }

    /// Return a preempted post to the queue
    ///
    /// The post re-enters at its original priority with the attempt counter
    /// incremented. A post whose id is not in flight (already requeued or
    /// completed) is left alone, so a preempted post reappears exactly once.
    pub async fn requeue_preempted(&self, mut post: Post) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.in_flight.remove(&post.id).is_none() {
            tracing::warn!(post_id = %post.id, "requeue ignored: post not in flight");
            return false;
        }

        post.attempts += 1;
        let now = Utc::now();
        let key = OrderKey {
            priority: post.priority,
            effective_at: post.scheduled_at.unwrap_or(now),
            seq: inner.seq,
        };
        inner.seq += 1;

        tracing::info!(post_id = %post.id, attempts = post.attempts, "preempted post requeued");

        // Id is still registered, so no duplicate can have slipped in
        inner.entries.insert(
            key,
            QueueEntry {
                post,
                enqueued_at: now,
            },
        );
        true
    }

    /// Release a post that reached a terminal state
    pub async fn complete(&self, post_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(post_id);
        inner.ids.remove(post_id);
    }

    /// Number of queued (not in-flight) posts
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the queue holds no pending posts
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Age of the oldest dispatchable post, for backlog monitoring
    ///
    /// Posts still waiting for their schedule time are not backlog.
    pub async fn oldest_waiting_age(&self) -> Option<chrono::Duration> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        inner
            .entries
            .values()
            .filter(|e| e.post.scheduled_at.map_or(true, |t| t <= now))
            .map(|e| e.enqueued_at)
            .min()
            .map(|oldest| now - oldest)
    }
}
