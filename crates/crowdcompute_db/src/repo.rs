//! Job/Task/Worker/WorkerFailure CRUD (§4.2).

use crate::error::{DbError, Result};
use crate::models::{JobRow, JobStats, TaskRow, WorkerFailureRow, WorkerRow};
use crate::CrowdComputeDb;
use chrono::{DateTime, Utc};
use crowdcompute_protocol::{FailureCause, JobStatus, TaskStatus, WorkerAvailability, WorkerSpecs};
use sqlx::QueryBuilder;

/// One task argument tuple to persist as part of a job submission.
pub struct NewTask {
    pub idx: i64,
    pub args_blob: String,
    pub priority: Option<i64>,
}

/// Sparse field set for `update_task` — only `Some` fields are written.
#[derive(Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub assignee_worker_id: Option<Option<String>>,
    pub attempts: Option<i64>,
    pub assigned_at: Option<Option<DateTime<Utc>>>,
    pub last_heartbeat: Option<Option<DateTime<Utc>>>,
    pub result_blob: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub checkpoint_ref: Option<Option<String>>,
}

/// Sparse field set for `update_worker`.
#[derive(Default)]
pub struct WorkerUpdate {
    pub availability: Option<WorkerAvailability>,
    pub current_task_job_id: Option<Option<String>>,
    pub current_task_idx: Option<Option<i64>>,
    pub reliability_score: Option<f64>,
    pub tasks_completed: Option<i64>,
    pub tasks_failed: Option<i64>,
    pub total_exec_time_secs: Option<f64>,
    pub last_heartbeat: Option<Option<DateTime<Utc>>>,
    pub connection_id: Option<Option<String>>,
}

impl CrowdComputeDb {
    /// Persist a new job and its child tasks in one transaction.
    pub async fn create_job(
        &self,
        job_id: &str,
        func_code: &str,
        total_task_count: i64,
        checkpoint_interval: Option<f64>,
        deadline: Option<DateTime<Utc>>,
        client_connection_id: Option<&str>,
        tasks: &[NewTask],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO jobs
                (id, submitted_at, client_connection_id, func_code, total_task_count, status, checkpoint_interval, deadline, result_vector)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)"#,
        )
        .bind(job_id)
        .bind(now)
        .bind(client_connection_id)
        .bind(func_code)
        .bind(total_task_count)
        .bind(JobStatus::Pending)
        .bind(checkpoint_interval)
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            sqlx::query(
                r#"INSERT INTO tasks (job_id, idx, args_blob, status, attempts, priority)
                   VALUES (?, ?, ?, ?, 0, ?)"#,
            )
            .bind(job_id)
            .bind(task.idx)
            .bind(&task.args_blob)
            .bind(TaskStatus::Pending)
            .bind(task.priority)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Update a job's aggregate status and, on completion, its result vector.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result_vector: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ?, result_vector = COALESCE(?, result_vector) WHERE id = ?")
            .bind(status)
            .bind(result_vector)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn query_job(&self, job_id: &str) -> Result<JobRow> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::JobNotFound(job_id.to_string()))
    }

    pub async fn query_tasks_by_job(&self, job_id: &str) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE job_id = ? ORDER BY idx ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Tasks currently `pending`, ordered `(priority asc, insertion-index
    /// asc)` so FIFO/priority schedulers can stream from it (§4.2).
    pub async fn query_pending_tasks(&self, limit: i64) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"SELECT * FROM tasks
               WHERE status = ?
               ORDER BY COALESCE(priority, 2147483647) ASC, idx ASC
               LIMIT ?"#,
        )
        .bind(TaskStatus::Pending)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Apply a sparse field update to one task.
    pub async fn update_task(&self, job_id: &str, idx: i64, fields: TaskUpdate) -> Result<()> {
        let mut builder = QueryBuilder::new("UPDATE tasks SET ");
        let mut first = true;

        macro_rules! set_field {
            ($name:literal, $value:expr) => {
                if !first {
                    builder.push(", ");
                }
                first = false;
                builder.push($name);
                builder.push(" = ");
                builder.push_bind($value);
            };
        }

        if let Some(status) = fields.status {
            set_field!("status", status);
        }
        if let Some(assignee) = fields.assignee_worker_id {
            set_field!("assignee_worker_id", assignee);
        }
        if let Some(attempts) = fields.attempts {
            set_field!("attempts", attempts);
        }
        if let Some(assigned_at) = fields.assigned_at {
            set_field!("assigned_at", assigned_at);
        }
        if let Some(last_heartbeat) = fields.last_heartbeat {
            set_field!("last_heartbeat", last_heartbeat);
        }
        if let Some(result_blob) = fields.result_blob {
            set_field!("result_blob", result_blob);
        }
        if let Some(last_error) = fields.last_error {
            set_field!("last_error", last_error);
        }
        if let Some(checkpoint_ref) = fields.checkpoint_ref {
            set_field!("checkpoint_ref", checkpoint_ref);
        }

        if first {
            return Ok(());
        }

        builder.push(" WHERE job_id = ");
        builder.push_bind(job_id.to_string());
        builder.push(" AND idx = ");
        builder.push_bind(idx);

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_worker(&self, worker_id: &str, specs: &WorkerSpecs) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO workers
                (id, availability, cpu_freq_ghz, cores, memory_gb, battery_pct, signal_strength, platform, device_type, reliability_score, tasks_completed, tasks_failed, total_exec_time_secs)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1.0, 0, 0, 0.0)
               ON CONFLICT(id) DO UPDATE SET
                 cpu_freq_ghz = excluded.cpu_freq_ghz,
                 cores = excluded.cores,
                 memory_gb = excluded.memory_gb,
                 battery_pct = excluded.battery_pct,
                 signal_strength = excluded.signal_strength,
                 platform = excluded.platform,
                 device_type = excluded.device_type"#,
        )
        .bind(worker_id)
        .bind(WorkerAvailability::Idle)
        .bind(specs.cpu_freq_ghz)
        .bind(specs.cores.map(|c| c as i64))
        .bind(specs.memory_gb)
        .bind(specs.battery_pct)
        .bind(specs.signal_strength)
        .bind(&specs.platform)
        .bind(&specs.device_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn query_worker(&self, worker_id: &str) -> Result<WorkerRow> {
        sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::WorkerNotFound(worker_id.to_string()))
    }

    pub async fn update_worker(&self, worker_id: &str, fields: WorkerUpdate) -> Result<()> {
        let mut builder = QueryBuilder::new("UPDATE workers SET ");
        let mut first = true;

        macro_rules! set_field {
            ($name:literal, $value:expr) => {
                if !first {
                    builder.push(", ");
                }
                first = false;
                builder.push($name);
                builder.push(" = ");
                builder.push_bind($value);
            };
        }

        if let Some(availability) = fields.availability {
            set_field!("availability", availability);
        }
        if let Some(job_id) = fields.current_task_job_id {
            set_field!("current_task_job_id", job_id);
        }
        if let Some(idx) = fields.current_task_idx {
            set_field!("current_task_idx", idx);
        }
        if let Some(score) = fields.reliability_score {
            set_field!("reliability_score", score);
        }
        if let Some(completed) = fields.tasks_completed {
            set_field!("tasks_completed", completed);
        }
        if let Some(failed) = fields.tasks_failed {
            set_field!("tasks_failed", failed);
        }
        if let Some(exec_time) = fields.total_exec_time_secs {
            set_field!("total_exec_time_secs", exec_time);
        }
        if let Some(heartbeat) = fields.last_heartbeat {
            set_field!("last_heartbeat", heartbeat);
        }
        if let Some(conn_id) = fields.connection_id {
            set_field!("connection_id", conn_id);
        }

        if first {
            return Ok(());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(worker_id.to_string());

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn available_worker_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM workers WHERE availability = ?")
                .bind(WorkerAvailability::Idle)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn record_worker_failure(
        &self,
        worker_id: &str,
        job_id: &str,
        task_idx: i64,
        cause_class: FailureCause,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO worker_failures (worker_id, job_id, task_idx, occurred_at, cause_class, message)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(worker_id)
        .bind(job_id)
        .bind(task_idx)
        .bind(Utc::now())
        .bind(cause_class)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn worker_failures_for(&self, worker_id: &str) -> Result<Vec<WorkerFailureRow>> {
        let rows = sqlx::query_as::<_, WorkerFailureRow>(
            "SELECT * FROM worker_failures WHERE worker_id = ? ORDER BY occurred_at ASC",
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Per-job task-status counts (§4.2, backs `get_job_status`).
    pub async fn job_stats(&self, job_id: &str) -> Result<JobStats> {
        let stats = sqlx::query_as::<_, JobStats>(
            r#"SELECT
                 COUNT(*) FILTER (WHERE status = 'pending') as pending,
                 COUNT(*) FILTER (WHERE status = 'assigned') as assigned,
                 COUNT(*) FILTER (WHERE status = 'running') as running,
                 COUNT(*) FILTER (WHERE status = 'completed') as completed,
                 COUNT(*) FILTER (WHERE status = 'failed') as failed
               FROM tasks WHERE job_id = ?"#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    fn tasks(n: i64) -> Vec<NewTask> {
        (0..n)
            .map(|i| NewTask {
                idx: i,
                args_blob: format!("[{i}]"),
                priority: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn create_job_persists_job_and_tasks() {
        let db = test_db().await;
        db.create_job("j1", "deadbeef", 3, None, None, None, &tasks(3))
            .await
            .unwrap();

        let job = db.query_job("j1").await.unwrap();
        assert_eq!(job.total_task_count, 3);
        assert_eq!(job.status, JobStatus::Pending);

        let rows = db.query_tasks_by_job("j1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].idx, 0);
    }

    #[tokio::test]
    async fn query_pending_tasks_orders_by_priority_then_index() {
        let db = test_db().await;
        let mut ts = tasks(3);
        ts[0].priority = Some(5);
        ts[1].priority = Some(1);
        ts[2].priority = None;
        db.create_job("j1", "deadbeef", 3, None, None, None, &ts)
            .await
            .unwrap();

        let pending = db.query_pending_tasks(10).await.unwrap();
        let order: Vec<i64> = pending.iter().map(|t| t.idx).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[tokio::test]
    async fn update_task_writes_only_sparse_fields() {
        let db = test_db().await;
        db.create_job("j1", "deadbeef", 1, None, None, None, &tasks(1))
            .await
            .unwrap();

        db.update_task(
            "j1",
            0,
            TaskUpdate {
                status: Some(TaskStatus::Assigned),
                assignee_worker_id: Some(Some("w1".to_string())),
                attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let rows = db.query_tasks_by_job("j1").await.unwrap();
        assert_eq!(rows[0].status, TaskStatus::Assigned);
        assert_eq!(rows[0].assignee_worker_id.as_deref(), Some("w1"));
        assert_eq!(rows[0].attempts, 1);
    }

    #[tokio::test]
    async fn upsert_worker_then_update_marks_busy() {
        let db = test_db().await;
        db.upsert_worker("w1", &WorkerSpecs::default()).await.unwrap();
        let worker = db.query_worker("w1").await.unwrap();
        assert_eq!(worker.availability, WorkerAvailability::Idle);

        db.update_worker(
            "w1",
            WorkerUpdate {
                availability: Some(WorkerAvailability::Busy),
                current_task_job_id: Some(Some("j1".to_string())),
                current_task_idx: Some(Some(0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let worker = db.query_worker("w1").await.unwrap();
        assert_eq!(worker.availability, WorkerAvailability::Busy);
        assert_eq!(worker.current_task_job_id.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn record_worker_failure_then_list() {
        let db = test_db().await;
        db.upsert_worker("w1", &WorkerSpecs::default()).await.unwrap();
        db.record_worker_failure("w1", "j1", 0, FailureCause::Disconnect, "connection closed")
            .await
            .unwrap();

        let failures = db.worker_failures_for("w1").await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].cause_class, FailureCause::Disconnect);
    }

    #[tokio::test]
    async fn job_stats_counts_by_status() {
        let db = test_db().await;
        db.create_job("j1", "deadbeef", 2, None, None, None, &tasks(2))
            .await
            .unwrap();
        db.update_task("j1", 0, TaskUpdate { status: Some(TaskStatus::Completed), ..Default::default() })
            .await
            .unwrap();

        let stats = db.job_stats("j1").await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
    }
}
