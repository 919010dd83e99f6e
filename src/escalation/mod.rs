//! Manual escalation queue for posts that exhausted every automated strategy
//!
//! The queue is a durable holding area: a record is persisted before it is
//! considered committed, survives restarts, and stays pending until an
//! operator resolves it with the externally-posted URL and a note. Records
//! carry the full ordered log of strategies attempted so the operator sees
//! exactly what automation already tried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::models::StrategyAttempt;
use crate::platform::Platform;
use crate::storage::EscalationRepository;

/// Errors from escalation queue operations
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    /// Record not found
    #[error("escalation not found: {0}")]
    NotFound(String),

    /// Record already resolved by an operator
    #[error("escalation already resolved: {0}")]
    AlreadyResolved(String),

    /// Persistence failure
    #[error("escalation store error: {0}")]
    Store(String),

    /// Export I/O failure
    #[error("export failed: {0}")]
    Export(String),
}

/// Resolution state of an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Waiting for an operator
    Pending,
    /// Operator posted manually and closed the record
    Resolved,
}

impl ResolutionStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator resolution metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// URL of the manually-created platform post, if one was made
    pub external_url: Option<String>,
    /// Operator note
    pub note: String,
    /// Operator identifier
    pub operator: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// A post/platform pair handed off to human operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Unique escalation id
    pub id: String,

    pub post_id: String,
    pub platform: Platform,

    /// Ordered log of every strategy attempted with its failure reason
    pub attempts: Vec<StrategyAttempt>,

    pub created_at: DateTime<Utc>,
    pub status: ResolutionStatus,
    pub resolution: Option<Resolution>,
}

impl EscalationRecord {
    /// Create a pending record with a fresh id
    pub fn new(
        post_id: impl Into<String>,
        platform: Platform,
        attempts: Vec<StrategyAttempt>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            post_id: post_id.into(),
            platform,
            attempts,
            created_at: Utc::now(),
            status: ResolutionStatus::Pending,
            resolution: None,
        }
    }

    /// Whether the record is still waiting for an operator
    pub fn is_pending(&self) -> bool {
        self.status == ResolutionStatus::Pending
    }
}

/// Durable queue of escalation records
pub struct ManualEscalationQueue {
    repository: Arc<dyn EscalationRepository>,
}

impl ManualEscalationQueue {
    /// Create a queue backed by the given repository
    pub fn new(repository: Arc<dyn EscalationRepository>) -> Self {
        Self { repository }
    }

    /// Persist a new escalation record
    ///
    /// The record is written to the store before this returns; callers may
    /// treat a returned record as durably committed.
    pub fn add(
        &self,
        post_id: &str,
        platform: Platform,
        attempts: Vec<StrategyAttempt>,
    ) -> Result<EscalationRecord, EscalationError> {
        let record = EscalationRecord::new(post_id, platform, attempts);
        self.repository
            .insert(&record)
            .map_err(|e| EscalationError::Store(e.to_string()))?;

        tracing::warn!(
            escalation_id = %record.id,
            post_id = %record.post_id,
            platform = %record.platform,
            strategies_tried = record.attempts.len(),
            "post escalated to manual queue"
        );
        Ok(record)
    }

    /// List pending records
    pub fn pending(&self) -> Result<Vec<EscalationRecord>, EscalationError> {
        self.repository
            .pending()
            .map_err(|e| EscalationError::Store(e.to_string()))
    }

    /// Get a record by id
    pub fn get(&self, id: &str) -> Result<EscalationRecord, EscalationError> {
        self.repository
            .get(id)
            .map_err(|e| EscalationError::Store(e.to_string()))?
            .ok_or_else(|| EscalationError::NotFound(id.to_string()))
    }

    /// Record an operator resolution
    pub fn resolve(
        &self,
        id: &str,
        external_url: Option<String>,
        note: impl Into<String>,
        operator: Option<String>,
    ) -> Result<EscalationRecord, EscalationError> {
        let mut record = self.get(id)?;

        if record.status == ResolutionStatus::Resolved {
            return Err(EscalationError::AlreadyResolved(id.to_string()));
        }

        record.status = ResolutionStatus::Resolved;
        record.resolution = Some(Resolution {
            external_url,
            note: note.into(),
            operator,
            resolved_at: Utc::now(),
        });

        self.repository
            .update(&record)
            .map_err(|e| EscalationError::Store(e.to_string()))?;

        tracing::info!(escalation_id = %record.id, "escalation resolved");
        Ok(record)
    }

    /// Export pending records as pretty JSON for operator tooling
    pub fn export(&self, path: &Path) -> Result<usize, EscalationError> {
        let records = self.pending()?;
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| EscalationError::Export(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EscalationError::Export(e.to_string()))?;
        }
        std::fs::write(path, json).map_err(|e| EscalationError::Export(e.to_string()))?;

        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStateRepository;

    fn queue() -> ManualEscalationQueue {
        let repo = Arc::new(SqliteStateRepository::in_memory().unwrap());
        ManualEscalationQueue::new(repo)
    }

    fn sample_attempts() -> Vec<StrategyAttempt> {
        vec![
            StrategyAttempt {
                strategy: "api_direct".to_string(),
                error: "network error: timeout".to_string(),
                at: Utc::now(),
            },
            StrategyAttempt {
                strategy: "api_via_egress".to_string(),
                error: "egress pool exhausted".to_string(),
                at: Utc::now(),
            },
        ]
    }

    #[test]
    fn test_add_and_list_pending() {
        let queue = queue();

        let record = queue
            .add("post-1", Platform::Tiktok, sample_attempts())
            .unwrap();
        assert!(record.is_pending());
        assert_eq!(record.attempts.len(), 2);

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post_id, "post-1");
    }

    #[test]
    fn test_resolve_removes_from_pending() {
        let queue = queue();
        let record = queue.add("post-1", Platform::X, sample_attempts()).unwrap();

        let resolved = queue
            .resolve(
                &record.id,
                Some("https://x.com/status/123".to_string()),
                "posted by hand",
                Some("operator-kim".to_string()),
            )
            .unwrap();

        assert_eq!(resolved.status, ResolutionStatus::Resolved);
        assert!(resolved.resolution.is_some());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn test_double_resolve_rejected() {
        let queue = queue();
        let record = queue.add("post-1", Platform::X, Vec::new()).unwrap();

        queue.resolve(&record.id, None, "done", None).unwrap();
        let second = queue.resolve(&record.id, None, "again", None);
        assert!(matches!(second, Err(EscalationError::AlreadyResolved(_))));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let queue = queue();
        let result = queue.resolve("missing", None, "note", None);
        assert!(matches!(result, Err(EscalationError::NotFound(_))));
    }

    #[test]
    fn test_export_writes_pending_records() {
        let queue = queue();
        queue.add("post-1", Platform::Youtube, Vec::new()).unwrap();
        queue.add("post-2", Platform::Telegram, Vec::new()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escalations.json");
        let count = queue.export(&path).unwrap();

        assert_eq!(count, 2);
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<EscalationRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
