//! Shared mock collaborators for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nalgae::alerts::channels::{Channel, ChannelResult, DeliveryStatus};
use nalgae::alerts::Alert;
use nalgae::egress::{EgressProvider, Probe};
use nalgae::platform::{Platform, PlatformAdapter, UploadError, UploadReceipt, UploadRequest};
use nalgae::session::{Session, SessionError, SessionProvider};

/// Platform adapter that replays a scripted sequence of results, then falls
/// back to generated successes
pub struct ScriptedAdapter {
    platform: Platform,
    script: Mutex<VecDeque<Result<String, UploadError>>>,
    pub uploads: AtomicUsize,
}

impl ScriptedAdapter {
    /// Adapter that always succeeds
    pub fn succeeding(platform: Platform) -> Arc<Self> {
        Self::scripted(platform, Vec::new())
    }

    /// Adapter that replays the given results in order
    pub fn scripted(platform: Platform, script: Vec<Result<String, UploadError>>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(script.into()),
            uploads: AtomicUsize::new(0),
        })
    }

    /// Adapter that fails with network errors on the first `failures` calls
    pub fn flaky(platform: Platform, failures: usize) -> Arc<Self> {
        Self::scripted(
            platform,
            std::iter::repeat_with(|| Err(UploadError::network("connection reset")))
                .take(failures)
                .collect(),
        )
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn upload(&self, _request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result.map(|id| UploadReceipt::new(self.platform, id)),
            None => Ok(UploadReceipt::new(self.platform, format!("ext-{n}"))),
        }
    }

    async fn check_reachable(&self) -> bool {
        true
    }
}

/// Egress provider with a fixed connect result
pub struct StaticEgressProvider {
    pub up: bool,
    pub disconnects: AtomicUsize,
}

impl StaticEgressProvider {
    pub fn up() -> Arc<Self> {
        Arc::new(Self {
            up: true,
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn down() -> Arc<Self> {
        Arc::new(Self {
            up: false,
            disconnects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EgressProvider for StaticEgressProvider {
    async fn connect(&self, _path: &str) -> bool {
        self.up
    }

    async fn disconnect(&self, _path: &str) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Probe with a fixed answer
pub struct StaticProbe {
    pub up: bool,
}

impl StaticProbe {
    pub fn up() -> Arc<Self> {
        Arc::new(Self { up: true })
    }

    pub fn down() -> Arc<Self> {
        Arc::new(Self { up: false })
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn check(&self, _endpoint: &str) -> bool {
        self.up
    }
}

/// Session provider with an optional stored session
pub struct MemorySessionProvider {
    pub stored: Mutex<Option<Session>>,
    pub refresh_ok: bool,
    pub refreshes: AtomicUsize,
}

impl MemorySessionProvider {
    pub fn with_sessions() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(None),
            refresh_ok: true,
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(None),
            refresh_ok: false,
            refreshes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn load(&self, platform: Platform) -> Result<Option<Session>, SessionError> {
        let stored = self.stored.lock().unwrap().clone();
        if stored.is_some() {
            return Ok(stored);
        }
        if self.refresh_ok {
            Ok(Some(Session::new(platform, "stored", 24)))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self.stored.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    async fn refresh(&self, platform: Platform) -> Result<Session, SessionError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_ok {
            Ok(Session::new(platform, "refreshed", 24))
        } else {
            Err(SessionError::RefreshFailed {
                platform,
                reason: "no credentials".to_string(),
            })
        }
    }
}

/// Alert channel that collects every alert it is asked to send
pub struct CollectingChannel {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(Vec::new()),
        })
    }

    pub fn collected(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for CollectingChannel {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn send(&self, alert: &Alert) -> ChannelResult<DeliveryStatus> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(DeliveryStatus::success("collecting"))
    }
}

/// Wait until the predicate holds or the timeout passes
pub async fn wait_until<F: Fn() -> bool>(predicate: F, timeout_ms: u64) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    predicate()
}
