//! Row models mapping directly onto the tables in [`crate::schema`].

use chrono::{DateTime, Utc};
use crowdcompute_protocol::{JobStatus, TaskStatus, WorkerAvailability};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub client_connection_id: Option<String>,
    pub func_code: String,
    pub total_task_count: i64,
    pub status: JobStatus,
    pub checkpoint_interval: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    /// JSON-encoded `Vec<serde_json::Value>`, populated once `status == completed`.
    pub result_vector: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub job_id: String,
    pub idx: i64,
    pub args_blob: String,
    pub status: TaskStatus,
    pub assignee_worker_id: Option<String>,
    pub attempts: i64,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub priority: Option<i64>,
    pub result_blob: Option<String>,
    pub last_error: Option<String>,
    pub checkpoint_ref: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: String,
    pub connection_id: Option<String>,
    pub availability: WorkerAvailability,
    pub current_task_job_id: Option<String>,
    pub current_task_idx: Option<i64>,
    pub cpu_freq_ghz: Option<f64>,
    pub cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub battery_pct: Option<f64>,
    pub signal_strength: Option<f64>,
    pub platform: Option<String>,
    pub device_type: Option<String>,
    pub reliability_score: f64,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub total_exec_time_secs: f64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkerFailureRow {
    pub id: i64,
    pub worker_id: String,
    pub job_id: String,
    pub task_idx: i64,
    pub occurred_at: DateTime<Utc>,
    pub cause_class: crowdcompute_protocol::FailureCause,
    pub message: String,
}

/// Per-job task-status counts, as returned by `job_stats` (§4.2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, FromRow)]
pub struct JobStats {
    pub pending: i64,
    pub assigned: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}
