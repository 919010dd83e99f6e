//! Durable state store
//!
//! Everything that must survive a crash goes through the repository traits
//! here: post records with their embedded per-platform outcome lists, the
//! throttle timestamps, and escalation records. The SQLite implementation is
//! the one concrete backend; the traits keep the orchestrator testable and
//! leave room for other stores.

pub mod repository;

pub use repository::{
    EscalationRepository, PostRepository, SqliteStateRepository, ThrottleRepository,
};
