//! Configuration management for the distribution orchestrator
//!
//! Configuration layers: built-in defaults, then a TOML file, then
//! `NALGAE_*` environment variables for the common overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cascade::{CascadeConfig, StrategyKind};
use crate::egress::EgressPathConfig;
use crate::queue::throttle::ThrottleConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Orchestrator loop configuration
    pub orchestrator: OrchestratorConfig,

    /// Posting spacing configuration
    pub throttle: ThrottleSettings,

    /// Strategy cascade configuration
    pub cascade: CascadeSettings,

    /// Egress pool configuration
    pub egress: EgressSettings,

    /// Alerting configuration
    pub alerts: AlertSettings,

    /// Durable store configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Orchestrator loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue poll interval when nothing is ready, in seconds
    pub poll_interval_secs: u64,

    /// Queue backlog age that raises a HIGH alert, in minutes
    pub backlog_alert_minutes: i64,

    /// Consecutive per-platform failures that raise a HIGH alert
    pub consecutive_failure_threshold: u32,
}

/// Posting spacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Hard minimum between posts to one platform, in minutes
    pub min_interval_minutes: i64,

    /// Recommended spacing, in minutes
    pub recommended_interval_minutes: i64,
}

/// Strategy cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeSettings {
    /// Strategy order; must end with the manual fall-back
    pub strategy_order: Vec<StrategyKind>,

    /// Transient retries per strategy
    pub max_transient_retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry
    pub backoff_base_ms: u64,

    /// Rate-limit pause when the platform reports no reset, in seconds
    pub rate_limit_fallback_secs: u64,
}

/// Egress pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressSettings {
    /// Paths in priority order
    pub paths: Vec<EgressPathConfig>,

    /// Probe timeout in seconds
    pub probe_timeout_secs: u64,

    /// Probe pacing (requests per second)
    pub probes_per_second: u32,
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Webhook endpoints to notify
    pub webhook_urls: Vec<String>,

    /// Minimum time between identical alerts, in minutes
    pub dedup_window_minutes: i64,

    /// Bound on concurrent alert sender tasks
    pub max_in_flight: usize,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("NALGAE_POLL_INTERVAL_SECS") {
            config.orchestrator.poll_interval_secs = v;
        }
        if let Some(v) = env_parse::<i64>("NALGAE_MIN_INTERVAL_MINUTES") {
            config.throttle.min_interval_minutes = v;
        }
        if let Some(v) = env_parse::<i64>("NALGAE_RECOMMENDED_INTERVAL_MINUTES") {
            config.throttle.recommended_interval_minutes = v;
        }
        if let Some(v) = env_parse::<u64>("NALGAE_PROBE_TIMEOUT_SECS") {
            config.egress.probe_timeout_secs = v;
        }
        if let Ok(raw) = std::env::var("NALGAE_EGRESS_PATHS") {
            config.egress.paths = parse_egress_paths(&raw)?;
        }
        if let Ok(raw) = std::env::var("NALGAE_ALERT_WEBHOOKS") {
            config.alerts.webhook_urls = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(path) = std::env::var("NALGAE_SQLITE_PATH") {
            config.storage.sqlite_path = path.into();
        }
        if let Ok(level) = std::env::var("NALGAE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("NALGAE_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.throttle.min_interval_minutes <= 0 {
            anyhow::bail!("min_interval_minutes must be positive");
        }

        if self.throttle.recommended_interval_minutes < self.throttle.min_interval_minutes {
            anyhow::bail!("recommended_interval_minutes must not be below the minimum interval");
        }

        if self.orchestrator.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        match self.cascade.strategy_order.last() {
            Some(StrategyKind::ManualFallback) => {}
            _ => anyhow::bail!("strategy_order must end with the manual fall-back"),
        }

        if self
            .cascade
            .strategy_order
            .contains(&StrategyKind::ApiViaEgress)
            && self.egress.paths.is_empty()
        {
            anyhow::bail!("api_via_egress is configured but no egress paths are defined");
        }

        for url in &self.alerts.webhook_urls {
            url::Url::parse(url).with_context(|| format!("invalid webhook URL: {url}"))?;
        }

        Ok(())
    }

    /// Throttle policy as the throttler consumes it
    #[must_use]
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_interval: chrono::Duration::minutes(self.throttle.min_interval_minutes),
            recommended_interval: chrono::Duration::minutes(
                self.throttle.recommended_interval_minutes,
            ),
        }
    }

    /// Cascade policy as the cascade consumes it
    #[must_use]
    pub fn cascade_config(&self) -> CascadeConfig {
        CascadeConfig {
            max_transient_retries: self.cascade.max_transient_retries,
            backoff_base: Duration::from_millis(self.cascade.backoff_base_ms),
            rate_limit_fallback: Duration::from_secs(self.cascade.rate_limit_fallback_secs),
        }
    }

    /// Probe timeout as Duration
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.egress.probe_timeout_secs)
    }

    /// Orchestrator poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator.poll_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Parse "name:region,name:region" egress path lists
fn parse_egress_paths(raw: &str) -> Result<Vec<EgressPathConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, region) = entry
                .split_once(':')
                .with_context(|| format!("egress path entry '{entry}' must be name:region"))?;
            Ok(EgressPathConfig {
                name: name.trim().to_string(),
                region: region.trim().to_string(),
            })
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                poll_interval_secs: 5,
                backlog_alert_minutes: 60,
                consecutive_failure_threshold: 3,
            },
            throttle: ThrottleSettings {
                min_interval_minutes: 30,
                recommended_interval_minutes: 45,
            },
            cascade: CascadeSettings {
                strategy_order: vec![
                    StrategyKind::ApiDirect,
                    StrategyKind::ApiViaEgress,
                    StrategyKind::SessionReplay,
                    StrategyKind::ManualFallback,
                ],
                max_transient_retries: 3,
                backoff_base_ms: 1000,
                rate_limit_fallback_secs: 45 * 60,
            },
            egress: EgressSettings {
                paths: vec![
                    EgressPathConfig {
                        name: String::from("vpn-us-east"),
                        region: String::from("us"),
                    },
                    EgressPathConfig {
                        name: String::from("vpn-eu-west"),
                        region: String::from("eu"),
                    },
                    EgressPathConfig {
                        name: String::from("vpn-ap-seoul"),
                        region: String::from("ap"),
                    },
                ],
                probe_timeout_secs: 10,
                probes_per_second: 2,
            },
            alerts: AlertSettings {
                webhook_urls: Vec::new(),
                dedup_window_minutes: 30,
                max_in_flight: 16,
            },
            storage: StorageConfig {
                sqlite_path: PathBuf::from("data/nalgae.db"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.throttle.min_interval_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recommended_below_minimum_rejected() {
        let mut config = Config::default();
        config.throttle.recommended_interval_minutes = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manual_fallback_must_be_last() {
        let mut config = Config::default();
        config.cascade.strategy_order = vec![StrategyKind::ApiDirect];
        assert!(config.validate().is_err());

        config.cascade.strategy_order =
            vec![StrategyKind::ApiDirect, StrategyKind::ManualFallback];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_via_egress_requires_paths() {
        let mut config = Config::default();
        config.egress.paths.clear();
        assert!(config.validate().is_err());

        config.cascade.strategy_order = vec![
            StrategyKind::ApiDirect,
            StrategyKind::SessionReplay,
            StrategyKind::ManualFallback,
        ];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_webhook_rejected() {
        let mut config = Config::default();
        config.alerts.webhook_urls = vec!["not a url".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_egress_paths() {
        let paths = parse_egress_paths("vpn-a:us, vpn-b:eu").unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].name, "vpn-a");
        assert_eq!(paths[1].region, "eu");

        assert!(parse_egress_paths("missing-region").is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(
            config.throttle_config().min_interval,
            chrono::Duration::minutes(30)
        );
        assert_eq!(
            config.cascade_config().backoff_base,
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let restored: Config = toml::from_str(&toml).unwrap();
        assert!(restored.validate().is_ok());
        assert_eq!(restored.egress.paths.len(), 3);
    }
}
