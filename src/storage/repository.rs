//! Repository pattern over the durable store
//!
//! Trait-based abstractions decouple orchestration logic from the storage
//! backend, enabling:
//! - Easy testing with in-memory databases
//! - Swappable backends behind the same contract
//! - Read-your-writes consistency for the orchestrator's own records
//!
//! The persisted layout follows the external-interface contract: a `posts`
//! record set keyed by post id with the per-platform outcome list embedded
//! in the record, a `throttle_state` record set keyed by platform, and an
//! `escalations` record set keyed by escalation id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::escalation::{EscalationRecord, ResolutionStatus};
use crate::models::{Post, PostStatus};
use crate::platform::Platform;

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository for post records
///
/// A post row embeds its full per-platform outcome list; writes are upserts
/// keyed by post id.
pub trait PostRepository: Send + Sync {
    /// Insert or replace a post record
    fn save_post(&self, post: &Post) -> Result<()>;

    /// Get a post by id
    fn get_post(&self, id: &str) -> Result<Option<Post>>;

    /// List posts with the given status
    fn list_by_status(&self, status: PostStatus) -> Result<Vec<Post>>;

    /// Count posts with the given status
    fn count_by_status(&self, status: PostStatus) -> Result<usize>;
}

/// Repository for per-platform throttle timestamps
pub trait ThrottleRepository: Send + Sync {
    /// Record the last successful post time for a platform
    fn record_post_time(&self, platform: Platform, at: DateTime<Utc>) -> Result<()>;

    /// Last successful post time for a platform, if any
    fn last_post_time(&self, platform: Platform) -> Result<Option<DateTime<Utc>>>;

    /// All recorded post times
    fn all_post_times(&self) -> Result<HashMap<Platform, DateTime<Utc>>>;
}

/// Repository for escalation records
pub trait EscalationRepository: Send + Sync {
    /// Insert a new record
    fn insert(&self, record: &EscalationRecord) -> Result<()>;

    /// Get a record by id
    fn get(&self, id: &str) -> Result<Option<EscalationRecord>>;

    /// List records still pending operator resolution
    fn pending(&self) -> Result<Vec<EscalationRecord>>;

    /// Replace an existing record (resolution updates)
    fn update(&self, record: &EscalationRecord) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of all three repositories
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection. WAL mode
/// keeps concurrent readers cheap.
pub struct SqliteStateRepository {
    conn: Mutex<Connection>,
}

impl SqliteStateRepository {
    /// Create a repository backed by a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite state repository initialized");
        Ok(repo)
    }

    /// Create an in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);

            CREATE TABLE IF NOT EXISTS throttle_state (
                platform TEXT PRIMARY KEY,
                last_posted_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS escalations (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_escalations_status ON escalations(status);",
        )
        .context("Failed to create schema")?;

        Ok(())
    }
}

impl PostRepository for SqliteStateRepository {
    fn save_post(&self, post: &Post) -> Result<()> {
        let payload = serde_json::to_string(post).context("Failed to serialize post")?;
        let conn = self.conn.lock().expect("repository mutex poisoned");

        conn.execute(
            "INSERT OR REPLACE INTO posts (id, status, priority, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                post.id,
                post.status.as_str(),
                post.priority.as_str(),
                post.created_at.to_rfc3339(),
                payload
            ],
        )
        .context("Failed to save post")?;

        Ok(())
    }

    fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let payload: Option<String> = conn
            .query_row("SELECT payload FROM posts WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to query post")?;

        payload
            .map(|p| serde_json::from_str(&p).context("Failed to deserialize post"))
            .transpose()
    }

    fn list_by_status(&self, status: PostStatus) -> Result<Vec<Post>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let mut stmt = conn.prepare(
            "SELECT payload FROM posts WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;

        let mut posts = Vec::new();
        for payload in rows {
            let payload = payload?;
            posts.push(serde_json::from_str(&payload).context("Failed to deserialize post")?);
        }
        Ok(posts)
    }

    fn count_by_status(&self, status: PostStatus) -> Result<usize> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl ThrottleRepository for SqliteStateRepository {
    fn record_post_time(&self, platform: Platform, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        conn.execute(
            "INSERT OR REPLACE INTO throttle_state (platform, last_posted_at) VALUES (?1, ?2)",
            params![platform.as_str(), at.to_rfc3339()],
        )
        .context("Failed to record post time")?;

        Ok(())
    }

    fn last_post_time(&self, platform: Platform) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let raw: Option<String> = conn
            .query_row(
                "SELECT last_posted_at FROM throttle_state WHERE platform = ?1",
                params![platform.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query throttle state")?;

        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .context("Invalid throttle timestamp")
        })
        .transpose()
    }

    fn all_post_times(&self) -> Result<HashMap<Platform, DateTime<Utc>>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let mut stmt = conn.prepare("SELECT platform, last_posted_at FROM throttle_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut times = HashMap::new();
        for row in rows {
            let (platform_raw, at_raw) = row?;
            // Rows for platforms no longer configured are skipped, not errors
            let Some(platform) = Platform::parse(&platform_raw) else {
                tracing::warn!(platform = %platform_raw, "unknown platform in throttle_state");
                continue;
            };
            let at = DateTime::parse_from_rfc3339(&at_raw)
                .context("Invalid throttle timestamp")?
                .with_timezone(&Utc);
            times.insert(platform, at);
        }
        Ok(times)
    }
}

impl EscalationRepository for SqliteStateRepository {
    fn insert(&self, record: &EscalationRecord) -> Result<()> {
        let payload = serde_json::to_string(record).context("Failed to serialize escalation")?;
        let conn = self.conn.lock().expect("repository mutex poisoned");

        conn.execute(
            "INSERT INTO escalations (id, post_id, platform, status, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.post_id,
                record.platform.as_str(),
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                payload
            ],
        )
        .context("Failed to insert escalation")?;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<EscalationRecord>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM escalations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query escalation")?;

        payload
            .map(|p| serde_json::from_str(&p).context("Failed to deserialize escalation"))
            .transpose()
    }

    fn pending(&self) -> Result<Vec<EscalationRecord>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let mut stmt = conn.prepare(
            "SELECT payload FROM escalations WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![ResolutionStatus::Pending.as_str()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut records = Vec::new();
        for payload in rows {
            let payload = payload?;
            records
                .push(serde_json::from_str(&payload).context("Failed to deserialize escalation")?);
        }
        Ok(records)
    }

    fn update(&self, record: &EscalationRecord) -> Result<()> {
        let payload = serde_json::to_string(record).context("Failed to serialize escalation")?;
        let conn = self.conn.lock().expect("repository mutex poisoned");

        let updated = conn.execute(
            "UPDATE escalations SET status = ?2, payload = ?3 WHERE id = ?1",
            params![record.id, record.status.as_str(), payload],
        )?;

        anyhow::ensure!(updated == 1, "escalation not found: {}", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PostMetadata, PriorityClass};

    #[test]
    fn test_post_roundtrip() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        let mut post = Post::new(
            "/media/clip.mp4",
            PostMetadata::titled("Roundtrip"),
            vec![Platform::Youtube, Platform::Facebook],
            PriorityClass::Normal,
        );
        post.compute_fingerprint();

        repo.save_post(&post).unwrap();
        let loaded = repo.get_post(&post.id).unwrap().unwrap();

        assert_eq!(loaded.id, post.id);
        assert_eq!(loaded.platforms, post.platforms);
        assert_eq!(loaded.content_fingerprint, post.content_fingerprint);
    }

    #[test]
    fn test_post_upsert_replaces() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        let mut post = Post::new(
            "/media/clip.mp4",
            PostMetadata::default(),
            vec![Platform::Youtube],
            PriorityClass::Normal,
        );
        repo.save_post(&post).unwrap();

        post.status = PostStatus::Completed;
        repo.save_post(&post).unwrap();

        let loaded = repo.get_post(&post.id).unwrap().unwrap();
        assert_eq!(loaded.status, PostStatus::Completed);
        assert_eq!(repo.count_by_status(PostStatus::Pending).unwrap(), 0);
        assert_eq!(repo.count_by_status(PostStatus::Completed).unwrap(), 1);
    }

    #[test]
    fn test_list_by_status_ordered_by_creation() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        for title in ["first", "second"] {
            let post = Post::new(
                "/media/clip.mp4",
                PostMetadata::titled(title),
                vec![Platform::X],
                PriorityClass::Normal,
            );
            repo.save_post(&post).unwrap();
        }

        let pending = repo.list_by_status(PostStatus::Pending).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_throttle_state_roundtrip() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        assert!(repo.last_post_time(Platform::Tiktok).unwrap().is_none());

        let at = Utc::now();
        repo.record_post_time(Platform::Tiktok, at).unwrap();

        let loaded = repo.last_post_time(Platform::Tiktok).unwrap().unwrap();
        assert_eq!(loaded.timestamp(), at.timestamp());

        let all = repo.all_post_times().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&Platform::Tiktok));
    }

    #[test]
    fn test_throttle_record_overwrites() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        let earlier = Utc::now() - chrono::Duration::hours(1);
        let later = Utc::now();

        repo.record_post_time(Platform::X, earlier).unwrap();
        repo.record_post_time(Platform::X, later).unwrap();

        let loaded = repo.last_post_time(Platform::X).unwrap().unwrap();
        assert_eq!(loaded.timestamp(), later.timestamp());
    }

    #[test]
    fn test_escalation_roundtrip_and_pending() {
        let repo = SqliteStateRepository::in_memory().unwrap();

        let record = EscalationRecord::new("post-1", Platform::Instagram, Vec::new());
        repo.insert(&record).unwrap();

        let pending = EscalationRepository::pending(&repo).unwrap();
        assert_eq!(pending.len(), 1);

        let mut resolved = pending[0].clone();
        resolved.status = ResolutionStatus::Resolved;
        repo.update(&resolved).unwrap();

        assert!(EscalationRepository::pending(&repo).unwrap().is_empty());
        let loaded = EscalationRepository::get(&repo, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ResolutionStatus::Resolved);
    }

    #[test]
    fn test_update_unknown_escalation_fails() {
        let repo = SqliteStateRepository::in_memory().unwrap();
        let record = EscalationRecord::new("post-1", Platform::X, Vec::new());
        assert!(repo.update(&record).is_err());
    }

    #[test]
    fn test_file_backed_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let post = Post::new(
            "/media/clip.mp4",
            PostMetadata::default(),
            vec![Platform::Youtube],
            PriorityClass::Breaking,
        );

        {
            let repo = SqliteStateRepository::new(&path).unwrap();
            repo.save_post(&post).unwrap();
        }

        let reopened = SqliteStateRepository::new(&path).unwrap();
        let loaded = reopened.get_post(&post.id).unwrap().unwrap();
        assert_eq!(loaded.priority, PriorityClass::Breaking);
    }
}
