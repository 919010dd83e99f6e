//! System assembly
//!
//! Wires the queue, throttler, egress pool, session store, cascades,
//! escalation queue, alerting, and orchestrator into one
//! [`DistributionSystem`] from a [`Config`] plus the external
//! collaborators (platform adapters, egress provider, session provider).
//! Nothing here is a process-wide singleton: every piece is owned state,
//! so several independent systems can coexist in one process.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::alerts::{AlertDispatcher, Channel, WebhookChannel};
use crate::cascade::{
    ApiDirectStrategy, ApiViaEgressStrategy, ManualFallbackStrategy, SessionReplayStrategy,
    StrategyCascade, StrategyKind, UploadStrategy,
};
use crate::config::Config;
use crate::egress::{EgressPool, EgressProvider, HttpProbe, Probe};
use crate::escalation::ManualEscalationQueue;
use crate::models::{DispatchStats, Post, PostStatus};
use crate::orchestrator::UploadOrchestrator;
use crate::platform::{Platform, PlatformAdapter};
use crate::queue::{PostingThrottler, PriorityQueue};
use crate::session::{Session, SessionError, SessionProvider, SessionStore};
use crate::storage::{PostRepository, SqliteStateRepository};

/// Session provider used when none is registered: every load misses and
/// every refresh fails, so session-replay gracefully falls through
struct NullSessionProvider;

#[async_trait::async_trait]
impl SessionProvider for NullSessionProvider {
    async fn load(&self, _platform: Platform) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }

    async fn save(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    async fn refresh(&self, platform: Platform) -> Result<Session, SessionError> {
        Err(SessionError::RefreshFailed {
            platform,
            reason: "no session provider registered".to_string(),
        })
    }
}

/// Builder for a fully-wired distribution system
pub struct SystemBuilder {
    config: Config,
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    egress_provider: Option<Arc<dyn EgressProvider>>,
    session_provider: Option<Arc<dyn SessionProvider>>,
    probe: Option<Arc<dyn Probe>>,
    channels: Vec<Arc<dyn Channel>>,
    repository: Option<Arc<SqliteStateRepository>>,
}

impl SystemBuilder {
    /// Start a builder from configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            egress_provider: None,
            session_provider: None,
            probe: None,
            channels: Vec::new(),
            repository: None,
        }
    }

    /// Register a platform adapter
    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    /// Register the egress provider (required when api_via_egress is in the
    /// strategy order)
    pub fn with_egress_provider(mut self, provider: Arc<dyn EgressProvider>) -> Self {
        self.egress_provider = Some(provider);
        self
    }

    /// Register the session provider
    pub fn with_session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session_provider = Some(provider);
        self
    }

    /// Override the channel probe (tests)
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Register an extra alert channel beyond the configured webhooks
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Use an existing repository instead of opening the configured path
    pub fn with_repository(mut self, repository: Arc<SqliteStateRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Assemble the system
    pub fn build(self) -> Result<DistributionSystem> {
        self.config.validate().context("invalid configuration")?;

        if self.adapters.is_empty() {
            anyhow::bail!(
                "no platform adapters registered; register at least one with with_adapter"
            );
        }

        let repository = match self.repository {
            Some(repo) => repo,
            None => Arc::new(SqliteStateRepository::new(&self.config.storage.sqlite_path)?),
        };

        let queue = Arc::new(PriorityQueue::new());
        let throttler = Arc::new(PostingThrottler::new(
            self.config.throttle_config(),
            Arc::clone(&repository) as _,
        )?);
        let escalations = Arc::new(ManualEscalationQueue::new(Arc::clone(&repository) as _));

        let mut alerts = AlertDispatcher::new()
            .with_dedup_window(chrono::Duration::minutes(
                self.config.alerts.dedup_window_minutes,
            ))
            .with_max_in_flight(self.config.alerts.max_in_flight);
        for url in &self.config.alerts.webhook_urls {
            let channel =
                WebhookChannel::from_url(url).context("invalid alert webhook configuration")?;
            alerts.add_channel(Arc::new(channel));
        }
        for channel in self.channels {
            alerts.add_channel(channel);
        }
        let alerts = Arc::new(alerts);

        let sessions = Arc::new(SessionStore::new(
            self.session_provider
                .unwrap_or_else(|| Arc::new(NullSessionProvider)),
        ));

        let wants_egress = self
            .config
            .cascade
            .strategy_order
            .contains(&StrategyKind::ApiViaEgress);
        let egress = if wants_egress {
            let provider = self.egress_provider.clone().context(
                "api_via_egress is in the strategy order but no egress provider is registered",
            )?;
            let probe: Arc<dyn Probe> = match self.probe {
                Some(probe) => probe,
                None => Arc::new(
                    HttpProbe::new(
                        self.config.probe_timeout(),
                        self.config.egress.probes_per_second,
                    )
                    .context("failed to build channel probe")?,
                ),
            };
            Some(Arc::new(EgressPool::new(
                self.config.egress.paths.clone(),
                provider,
                probe,
            )?))
        } else {
            None
        };

        let cascade_config = self.config.cascade_config();
        let mut cascades = HashMap::new();
        for (&platform, adapter) in &self.adapters {
            let mut strategies: Vec<Arc<dyn UploadStrategy>> = Vec::new();
            for kind in &self.config.cascade.strategy_order {
                match kind {
                    StrategyKind::ApiDirect => {
                        strategies.push(Arc::new(ApiDirectStrategy::new(Arc::clone(adapter))));
                    }
                    StrategyKind::ApiViaEgress => {
                        // Egress fallback only helps platforms that block by
                        // region; the rest skip straight to session replay
                        if platform.geo_restricted() {
                            let pool = egress.as_ref().expect("pool built when configured");
                            strategies.push(Arc::new(ApiViaEgressStrategy::new(
                                Arc::clone(adapter),
                                Arc::clone(pool),
                            )));
                        }
                    }
                    StrategyKind::SessionReplay => {
                        strategies.push(Arc::new(SessionReplayStrategy::new(
                            Arc::clone(adapter),
                            Arc::clone(&sessions),
                        )));
                    }
                    StrategyKind::ManualFallback => {
                        strategies.push(Arc::new(ManualFallbackStrategy::new(
                            platform,
                            Arc::clone(&escalations),
                        )));
                    }
                }
            }

            cascades.insert(
                platform,
                Arc::new(StrategyCascade::new(
                    platform,
                    strategies,
                    Arc::clone(&sessions),
                    Arc::clone(&alerts),
                    cascade_config.clone(),
                )),
            );
        }

        let stats = DispatchStats::new();
        let orchestrator = Arc::new(UploadOrchestrator::new(
            Arc::clone(&queue),
            Arc::clone(&throttler),
            cascades,
            Arc::clone(&repository) as _,
            Arc::clone(&alerts),
            Arc::clone(&stats),
            self.config.orchestrator.clone(),
        ));

        Ok(DistributionSystem {
            queue,
            throttler,
            orchestrator,
            escalations,
            egress,
            alerts,
            stats,
            repository,
        })
    }
}

/// A fully-wired distribution system
pub struct DistributionSystem {
    pub queue: Arc<PriorityQueue>,
    pub throttler: Arc<PostingThrottler>,
    pub orchestrator: Arc<UploadOrchestrator>,
    pub escalations: Arc<ManualEscalationQueue>,
    pub egress: Option<Arc<EgressPool>>,
    pub alerts: Arc<AlertDispatcher>,
    pub stats: Arc<DispatchStats>,
    pub repository: Arc<SqliteStateRepository>,
}

impl DistributionSystem {
    /// Reload persisted pending posts into the queue after a restart
    ///
    /// Duplicate ids (already enqueued this run) are skipped.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self.repository.list_by_status(PostStatus::Pending)?;
        let mut recovered = 0;

        for post in pending {
            match self.queue.enqueue(post).await {
                Ok(()) => recovered += 1,
                Err(crate::queue::QueueError::Duplicate(id)) => {
                    tracing::debug!(post_id = %id, "recovery skipped duplicate");
                }
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "pending posts recovered from store");
        }
        Ok(recovered)
    }

    /// Persist and enqueue a new post
    pub async fn submit(&self, post: Post) -> Result<()> {
        self.repository.save_post(&post)?;
        self.queue
            .enqueue(post)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        self.stats
            .enqueued
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}
