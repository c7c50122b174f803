//! Table definitions for the foreman's persisted state (§6 Persisted
//! state layout). Single source of truth for CREATE TABLE statements.

use crate::error::Result;
use crate::CrowdComputeDb;
use tracing::info;

impl CrowdComputeDb {
    /// Ensure all tables and indexes exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_job_tables().await?;
        self.create_worker_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_job_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                submitted_at TEXT NOT NULL,
                client_connection_id TEXT,
                func_code TEXT NOT NULL,
                total_task_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                checkpoint_interval REAL,
                deadline TEXT,
                result_vector TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks (
                job_id TEXT NOT NULL REFERENCES jobs(id),
                idx INTEGER NOT NULL,
                args_blob TEXT NOT NULL,
                status TEXT NOT NULL,
                assignee_worker_id TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                assigned_at TEXT,
                last_heartbeat TEXT,
                priority INTEGER,
                result_blob TEXT,
                last_error TEXT,
                checkpoint_ref TEXT,
                PRIMARY KEY (job_id, idx)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_pending_order ON tasks(status, priority, idx)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_worker_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_worker_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                connection_id TEXT,
                availability TEXT NOT NULL,
                current_task_job_id TEXT,
                current_task_idx INTEGER,
                cpu_freq_ghz REAL,
                cores INTEGER,
                memory_gb REAL,
                battery_pct REAL,
                signal_strength REAL,
                platform TEXT,
                device_type TEXT,
                reliability_score REAL NOT NULL DEFAULT 1.0,
                tasks_completed INTEGER NOT NULL DEFAULT 0,
                tasks_failed INTEGER NOT NULL DEFAULT 0,
                total_exec_time_secs REAL NOT NULL DEFAULT 0.0,
                last_heartbeat TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS worker_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                worker_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                task_idx INTEGER NOT NULL,
                occurred_at TEXT NOT NULL,
                cause_class TEXT NOT NULL,
                message TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_worker_failures_worker ON worker_failures(worker_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
