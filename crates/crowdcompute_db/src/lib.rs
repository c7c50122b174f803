//! Persistence layer for the foreman core (§4.2, §6 Persisted state layout).
//!
//! Exposes CRUD over jobs, tasks, workers, and worker failures, backed by
//! an embedded SQLite database. All mutations are transactional at the
//! per-call granularity; atomic claims (e.g. `query_pending_tasks`) use
//! `UPDATE ... WHERE status = ...` inside a transaction the same way the
//! rest of this codebase claims queue rows.

pub mod error;
pub mod models;
pub mod pool;
pub mod repo;
mod schema;

pub use error::{DbError, Result};
pub use models::{JobRow, JobStats, TaskRow, WorkerFailureRow, WorkerRow};
pub use repo::{NewTask, TaskUpdate, WorkerUpdate};

use sqlx::SqlitePool;

/// Handle to the foreman's persistence store.
#[derive(Clone)]
pub struct CrowdComputeDb {
    pool: SqlitePool,
}

impl CrowdComputeDb {
    /// Connect to `database_url`, creating the file and schema if absent.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = pool::create_pool(database_url, 5).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Connect with a single pooled connection. `sqlite::memory:` opens a
    /// fresh, unshared database per connection, so any in-memory store
    /// (tests, `--database sqlite::memory:`) must go through this and not
    /// [`Self::connect`] to avoid schema/data split across connections.
    pub async fn connect_single(database_url: &str) -> Result<Self> {
        let pool = pool::create_pool(database_url, 1).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Wrap an already-open pool (used by tests for an in-memory store).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> CrowdComputeDb {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    let db = CrowdComputeDb::from_pool(pool);
    db.ensure_schema().await.expect("create schema");
    db
}
