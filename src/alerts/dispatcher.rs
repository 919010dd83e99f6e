//! Alert dispatcher: bounded, non-blocking fan-out to channels

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::channels::Channel;
use super::{Alert, AlertCondition};

/// Default cap on concurrently-running sender tasks
const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Dispatches alerts to every registered channel without ever blocking the
/// caller
///
/// Sender tasks are detached and bounded by a semaphore; a channel that
/// fails to deliver is logged and never retried here (channels own their own
/// retry policy). Duplicate conditions within the dedup window are dropped.
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn Channel>>,

    /// Bounds the detached sender task set
    permits: Arc<Semaphore>,

    /// Last dispatch time per condition key
    last_dispatched: Mutex<HashMap<String, DateTime<Utc>>>,

    /// Minimum time between identical alerts
    dedup_window: Duration,
}

impl AlertDispatcher {
    /// Create a dispatcher with no channels (alerts are logged only)
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            last_dispatched: Mutex::new(HashMap::new()),
            dedup_window: Duration::minutes(30),
        }
    }

    /// Set the deduplication window
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Set the bound on concurrent sender tasks
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Register a channel
    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether an identical condition fired within the dedup window
    fn is_duplicate(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut last = self.last_dispatched.lock().expect("dedup mutex poisoned");
        match last.get(key) {
            Some(&at) if now - at < self.dedup_window => true,
            _ => {
                last.insert(key.to_string(), now);
                false
            }
        }
    }

    /// Raise an alert for a condition
    ///
    /// Returns the alert if it was dispatched, `None` if deduplicated.
    /// Always returns immediately; delivery happens in detached tasks.
    pub fn notify(&self, condition: AlertCondition, message: impl Into<String>) -> Option<Alert> {
        let alert = Alert::new(condition, message);
        self.dispatch(alert)
    }

    /// Dispatch a pre-built alert (context already attached)
    pub fn dispatch(&self, alert: Alert) -> Option<Alert> {
        let key = format!(
            "{}:{}",
            alert.condition.condition_type(),
            alert.condition.description()
        );

        if self.is_duplicate(&key, alert.created_at) {
            tracing::debug!(condition = %key, "alert deduplicated");
            return None;
        }

        tracing::warn!(
            severity = %alert.severity,
            condition = alert.condition.condition_type(),
            message = %alert.message,
            "alert raised"
        );

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let alert = alert.clone();
            let permits = Arc::clone(&self.permits);

            tokio::spawn(async move {
                // Bound, never block: if the pool is saturated we queue in
                // the detached task, not in the orchestration path
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                match channel.send(&alert).await {
                    Ok(status) if status.success => {
                        tracing::debug!(channel = channel.name(), alert_id = %alert.id, "alert delivered");
                    }
                    Ok(status) => {
                        tracing::error!(
                            channel = channel.name(),
                            alert_id = %alert.id,
                            detail = ?status.message,
                            "alert delivery failed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            channel = channel.name(),
                            alert_id = %alert.id,
                            error = %e,
                            "alert channel error"
                        );
                    }
                }
            });
        }

        Some(alert)
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
