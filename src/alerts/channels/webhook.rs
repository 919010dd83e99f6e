//! Webhook notification channel: alerts as HTTP POST payloads

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::alerts::Alert;

/// Webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional bearer token
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

impl WebhookConfig {
    /// Create a new webhook configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: std::collections::HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let parsed =
            url::Url::parse(&self.url).map_err(|e| format!("invalid webhook URL: {e}"))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err("webhook URL must use http or https".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Webhook notification channel
///
/// Sends alerts as JSON via HTTP POST:
///
/// ```json
/// {
///   "id": "alert-uuid",
///   "severity": "critical",
///   "message": "all upload strategies exhausted",
///   "condition": { "type": "strategies_exhausted", "platform": "tiktok", "post_id": "..." },
///   "context": { "attempts": "3" },
///   "created_at": "2026-01-01T12:00:00Z"
/// }
/// ```
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    /// Create a new webhook channel
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create a simple webhook channel with just a URL
    pub fn from_url(url: impl Into<String>) -> ChannelResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    /// Get the webhook URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Build the webhook payload from an alert
    fn build_payload(&self, alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "id": alert.id,
            "severity": alert.severity.as_str(),
            "message": alert.message,
            "condition": alert.condition,
            "context": alert.context,
            "created_at": alert.created_at.to_rfc3339(),
        })
    }

    /// Send the request with retry logic
    async fn send_with_retry(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    max = self.config.max_retries + 1,
                    "retrying webhook request"
                );
            }

            let mut request = self.client.post(&self.config.url);

            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }
            for (key, value) in &self.config.headers {
                request = request.header(key, value);
            }

            match request.json(payload).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(());
                    }

                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "unable to read response body".to_string());
                    last_error = Some(ChannelError::Other(format!("HTTP {status}: {body}")));

                    // Client errors will not get better on retry
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(ChannelError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChannelError::Other("unknown error".to_string())))
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> ChannelResult<DeliveryStatus> {
        let payload = self.build_payload(alert);

        match self.send_with_retry(&payload).await {
            Ok(()) => Ok(DeliveryStatus::success_with_message(
                "webhook",
                format!("delivered to {}", self.config.url),
            )),
            Err(e) => {
                tracing::error!(url = %self.config.url, error = %e, "webhook delivery failed");
                Ok(DeliveryStatus::failure("webhook", e.to_string()))
            }
        }
    }

    async fn health_check(&self) -> ChannelResult<bool> {
        match self.client.head(&self.config.url).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "webhook health check failed");
                Ok(false)
            }
        }
    }
}
