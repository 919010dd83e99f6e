//! Channel probe: cheap reachability checks against platform endpoints
//!
//! A probe answers one question: can the current egress path reach this
//! endpoint at all? It never performs a real upload. Any HTTP response,
//! including a 4xx, proves the endpoint is reachable; only connect errors
//! and timeouts fail a probe. Probes are rate-limited so scanning an egress
//! pool does not hammer platform endpoints.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Reachability check seam
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether the endpoint is reachable over the current egress
    async fn check(&self, endpoint: &str) -> bool;
}

/// HTTP-based probe
pub struct HttpProbe {
    client: reqwest::Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpProbe {
    /// Create a probe with the given per-request timeout and pacing
    pub fn new(timeout: Duration, probes_per_second: u32) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let rate = NonZeroU32::new(probes_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    /// Create a probe with design defaults (10s timeout, 2 probes/s)
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        Self::new(Duration::from_secs(10), 2)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, endpoint: &str) -> bool {
        self.rate_limiter.until_ready().await;

        match self.client.head(endpoint).send().await {
            Ok(response) => {
                tracing::debug!(endpoint, status = %response.status(), "probe reachable");
                true
            }
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "probe unreachable");
                false
            }
        }
    }
}
