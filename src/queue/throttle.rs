//! Posting throttler: minimum spacing between posts to one platform
//!
//! Platforms ban accounts that post on a machine-gun cadence, so successful
//! posts to a platform must be at least a configured interval apart. The
//! hard gate is the minimum interval; the recommended interval is only used
//! when suggesting a next posting time. Breaking posts bypass the gate but
//! still record their success time, so the spacing clock resets for the
//! routine posts that follow.
//!
//! Each platform's state is a single mutable cell behind its own mutex;
//! queries for different platforms never contend. A timestamp is persisted
//! through the [`ThrottleRepository`] before the in-memory cell commits, so
//! restart never forgets a recorded post.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::PriorityClass;
use crate::platform::Platform;
use crate::storage::ThrottleRepository;

/// Spacing policy
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Hard minimum between successful posts to one platform
    pub min_interval: Duration,

    /// Recommended spacing, used for suggested wait times
    pub recommended_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::minutes(30),
            recommended_interval: Duration::minutes(45),
        }
    }
}

#[derive(Debug, Default)]
struct ThrottleCell {
    last_success: Option<DateTime<Utc>>,
}

/// Per-platform posting throttler
pub struct PostingThrottler {
    cells: HashMap<Platform, Mutex<ThrottleCell>>,
    config: ThrottleConfig,
    repository: Arc<dyn ThrottleRepository>,
}

impl PostingThrottler {
    /// Create a throttler, restoring persisted timestamps
    pub fn new(config: ThrottleConfig, repository: Arc<dyn ThrottleRepository>) -> Result<Self> {
        let persisted = repository
            .all_post_times()
            .context("Failed to restore throttle state")?;

        let cells = Platform::all()
            .into_iter()
            .map(|platform| {
                let cell = ThrottleCell {
                    last_success: persisted.get(&platform).copied(),
                };
                (platform, Mutex::new(cell))
            })
            .collect();

        Ok(Self {
            cells,
            config,
            repository,
        })
    }

    fn cell(&self, platform: Platform) -> &Mutex<ThrottleCell> {
        // Cells exist for every platform variant by construction
        self.cells
            .get(&platform)
            .expect("throttle cell missing for platform")
    }

    /// Whether a post of the given priority may go out now
    ///
    /// Breaking posts are never delayed. Everything else waits until the
    /// minimum interval since the platform's last success has elapsed.
    pub async fn may_post_now(&self, platform: Platform, priority: PriorityClass) -> bool {
        if priority.bypasses_throttle() {
            return true;
        }

        let cell = self.cell(platform).lock().await;
        match cell.last_success {
            Some(last) => Utc::now() - last >= self.config.min_interval,
            None => true,
        }
    }

    /// Earliest time a non-breaking post to the platform is allowed
    ///
    /// With no posting history this is simply now.
    pub async fn next_allowed_time(&self, platform: Platform) -> DateTime<Utc> {
        let cell = self.cell(platform).lock().await;
        match cell.last_success {
            Some(last) => last + self.config.min_interval,
            None => Utc::now(),
        }
    }

    /// Recommended next posting time (softer than the hard gate)
    pub async fn suggested_next_time(&self, platform: Platform) -> DateTime<Utc> {
        let cell = self.cell(platform).lock().await;
        match cell.last_success {
            Some(last) => last + self.config.recommended_interval,
            None => Utc::now(),
        }
    }

    /// Record a successful post
    ///
    /// Recorded for every priority class, including breaking: the bypass is
    /// on the gate, not on the clock. Persisted before the in-memory commit.
    pub async fn record_post(
        &self,
        platform: Platform,
        at: DateTime<Utc>,
        priority: PriorityClass,
    ) -> Result<()> {
        let mut cell = self.cell(platform).lock().await;

        self.repository
            .record_post_time(platform, at)
            .context("Failed to persist throttle timestamp")?;

        cell.last_success = Some(at);
        tracing::debug!(%platform, %priority, at = %at, "post time recorded");
        Ok(())
    }

    /// Last recorded success for a platform
    pub async fn last_post_time(&self, platform: Platform) -> Option<DateTime<Utc>> {
        self.cell(platform).lock().await.last_success
    }
}
