//! nalgae - Resilient video distribution orchestrator
//!
//! Distributes video content to multiple third-party social platforms under
//! adversarial conditions: unreliable egress, hostile anti-automation
//! defenses, and strict per-platform posting limits, with breaking-news
//! preemption of routine work.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures (posts, priorities, outcomes)
//! - [`platform`] - The six target networks and the adapter boundary
//! - [`queue`] - Priority queue with preemption, posting throttler
//! - [`egress`] - Alternative egress paths and the channel probe
//! - [`session`] - Replayable authenticated sessions
//! - [`cascade`] - Cascading-fallback upload strategies
//! - [`orchestrator`] - Top-level coordination loop
//! - [`alerts`] - Severity-mapped alerting over pluggable channels
//! - [`escalation`] - Durable manual escalation queue
//! - [`storage`] - Durable state repositories (SQLite)
//! - [`bootstrap`] - Assembly of a full distribution system
//!
//! # Example
//!
//! ```no_run
//! use nalgae::bootstrap::SystemBuilder;
//! use nalgae::config::Config;
//!
//! # async fn example(adapter: std::sync::Arc<dyn nalgae::platform::PlatformAdapter>) -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let system = SystemBuilder::new(config).with_adapter(adapter).build()?;
//! system.recover_pending().await?;
//! system.orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod bootstrap;
pub mod cascade;
pub mod config;
pub mod egress;
pub mod error;
pub mod escalation;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod session;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{DistributionSystem, SystemBuilder};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, NalgaeErrorTrait, Result};
    pub use crate::models::{Post, PostMetadata, PostStatus, PlatformOutcome, PriorityClass};
    pub use crate::orchestrator::UploadOrchestrator;
    pub use crate::platform::{Platform, PlatformAdapter, UploadError};
    pub use crate::queue::{PostingThrottler, PriorityQueue};
}

// Direct re-exports for convenience
pub use models::{Post, PostMetadata, PostStatus, PriorityClass};
pub use platform::Platform;
