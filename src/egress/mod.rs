//! Egress pool: alternative network paths for geo-restricted platforms
//!
//! The pool manages a fixed, configurable set of named egress paths (VPN
//! exits tagged by region). `acquire` scans paths in configured priority
//! order: connect, probe the target platform's endpoint, and hand out the
//! first path that passes both. Paths that fail a scan sit out the next
//! full scan and become eligible again on the one after.
//!
//! A path has a single owner while in use; if every path is held, `acquire`
//! queues on a [`tokio::sync::Notify`] until a release. When every
//! configured path fails verification, `acquire` returns the typed
//! [`EgressError::Exhausted`] — the cascade treats that as "this strategy
//! unavailable", not as an upload failure.

pub mod probe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::platform::Platform;

pub use probe::{HttpProbe, Probe};

/// Errors from egress pool operations
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    /// Every configured path failed verification or is cooling down
    #[error("egress pool exhausted: no path verified")]
    Exhausted,

    /// The pool was built without any paths
    #[error("no egress paths configured")]
    NoPathsConfigured,
}

/// Verification state of one egress path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// Never checked, or torn down since the last check
    Unknown,
    /// Passed connect + probe on the most recent use
    VerifiedWorking,
    /// Failed connect or probe on the most recent check
    Failed,
}

impl Default for PathStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Static configuration for one egress path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressPathConfig {
    /// Path name handed to the egress provider
    pub name: String,
    /// Region tag (informational)
    pub region: String,
}

/// Point-in-time view of a path, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EgressPathInfo {
    pub name: String,
    pub region: String,
    pub status: PathStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub in_use: bool,
}

/// External collaborator that establishes and tears down egress paths
#[async_trait]
pub trait EgressProvider: Send + Sync {
    /// Bring the named path up; false means the connection failed
    async fn connect(&self, path: &str) -> bool;

    /// Tear the named path down
    async fn disconnect(&self, path: &str);
}

/// Exclusive claim on one egress path
///
/// Must be returned to the pool with [`EgressPool::release`] on every exit
/// path of the upload attempt; release tears the connection down.
#[derive(Debug)]
pub struct EgressHandle {
    index: usize,
    /// Path name, for logging and provider calls
    pub path: String,
}

#[derive(Debug, Default)]
struct PathState {
    status: PathStatus,
    last_checked: Option<DateTime<Utc>>,
    in_use: bool,
    /// Scan number from which this path is eligible again after a failure
    eligible_from_scan: u64,
}

struct PathSlot {
    config: EgressPathConfig,
    state: Mutex<PathState>,
}

/// Pool of alternative egress paths
pub struct EgressPool {
    paths: Vec<PathSlot>,
    provider: Arc<dyn EgressProvider>,
    probe: Arc<dyn Probe>,
    scans: AtomicU64,
    released: Notify,
}

impl EgressPool {
    /// Create a pool over the configured paths, in priority order
    pub fn new(
        paths: Vec<EgressPathConfig>,
        provider: Arc<dyn EgressProvider>,
        probe: Arc<dyn Probe>,
    ) -> Result<Self, EgressError> {
        if paths.is_empty() {
            return Err(EgressError::NoPathsConfigured);
        }

        Ok(Self {
            paths: paths
                .into_iter()
                .map(|config| PathSlot {
                    config,
                    state: Mutex::new(PathState::default()),
                })
                .collect(),
            provider,
            probe,
            scans: AtomicU64::new(0),
            released: Notify::new(),
        })
    }

    /// Acquire a verified-working path for uploads to the platform
    ///
    /// Scans paths in configured order; queues if every path is held by
    /// another cascade; returns [`EgressError::Exhausted`] when no path
    /// passes verification.
    pub async fn acquire(&self, platform: Platform) -> Result<EgressHandle, EgressError> {
        loop {
            // Register interest before scanning so a release between the
            // scan and the wait is never lost
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let scan = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
            let mut any_held = false;

            for (index, slot) in self.paths.iter().enumerate() {
                {
                    let mut state = slot.state.lock().await;
                    if state.in_use {
                        any_held = true;
                        continue;
                    }
                    if scan < state.eligible_from_scan {
                        tracing::debug!(path = %slot.config.name, scan, "path cooling down, skipped");
                        continue;
                    }
                    // Claim the path; connect/probe run without the state lock
                    state.in_use = true;
                }

                if !self.provider.connect(&slot.config.name).await {
                    tracing::warn!(path = %slot.config.name, "egress connect failed");
                    self.mark_failed(slot, scan).await;
                    continue;
                }

                if !self.probe.check(platform.api_endpoint()).await {
                    tracing::warn!(
                        path = %slot.config.name,
                        %platform,
                        "egress probe failed, tearing down"
                    );
                    self.provider.disconnect(&slot.config.name).await;
                    self.mark_failed(slot, scan).await;
                    continue;
                }

                {
                    let mut state = slot.state.lock().await;
                    state.status = PathStatus::VerifiedWorking;
                    state.last_checked = Some(Utc::now());
                }

                tracing::info!(path = %slot.config.name, %platform, "egress path acquired");
                return Ok(EgressHandle {
                    index,
                    path: slot.config.name.clone(),
                });
            }

            if any_held {
                // Pool-level queueing: wait for a release, then rescan
                released.await;
                continue;
            }

            return Err(EgressError::Exhausted);
        }
    }

    /// Release a path: tear down the connection and free the slot
    pub async fn release(&self, handle: EgressHandle) {
        self.provider.disconnect(&handle.path).await;

        if let Some(slot) = self.paths.get(handle.index) {
            let mut state = slot.state.lock().await;
            state.in_use = false;
        }

        tracing::debug!(path = %handle.path, "egress path released");
        self.released.notify_waiters();
    }

    /// Mark a path failed and start its cool-down
    ///
    /// A path failing in scan N is skipped in scan N+1 and retried in N+2.
    async fn mark_failed(&self, slot: &PathSlot, scan: u64) {
        let mut state = slot.state.lock().await;
        state.status = PathStatus::Failed;
        state.last_checked = Some(Utc::now());
        state.eligible_from_scan = scan + 2;
        state.in_use = false;
        self.released.notify_waiters();
    }

    /// Snapshot of every path's state
    pub async fn path_info(&self) -> Vec<EgressPathInfo> {
        let mut info = Vec::with_capacity(self.paths.len());
        for slot in &self.paths {
            let state = slot.state.lock().await;
            info.push(EgressPathInfo {
                name: slot.config.name.clone(),
                region: slot.config.region.clone(),
                status: state.status,
                last_checked: state.last_checked,
                in_use: state.in_use,
            });
        }
        info
    }
}
