//! Wire envelope, status enums, and payload shapes for the foreman protocol.
//!
//! Message bodies are intentionally untyped (`serde_json::Value`) at the
//! envelope level — §4.1 only constrains `type`/`job_id`/`worker_id`/`data`.
//! The payload structs here describe the recognized `data` shapes for each
//! `type` and are decoded on demand by the router.

use crowdcompute_ids::{JobId, TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The outer frame every message on the wire is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            job_id: None,
            worker_id: None,
            data,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn decode_data<T: for<'de> Deserialize<'de>>(&self) -> crate::error::Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| crate::error::ProtocolError::BadMessage(e.to_string()))
    }
}

/// Recognized message-type discriminators (§4.7).
pub mod message_type {
    pub const SUBMIT_JOB: &str = "submit_job";
    pub const JOB_ACCEPTED: &str = "job_accepted";
    pub const GET_JOB_STATUS: &str = "get_job_status";
    pub const JOB_STATUS: &str = "job_status";
    pub const REGISTER_WORKER: &str = "register_worker";
    pub const WORKER_READY: &str = "worker_ready";
    pub const ASSIGN_TASK: &str = "assign_task";
    pub const TASK_RESULT: &str = "task_result";
    pub const TASK_ERROR: &str = "task_error";
    pub const WORKER_HEARTBEAT: &str = "worker_heartbeat";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const TASK_CHECKPOINT: &str = "task_checkpoint";
    pub const CHECKPOINT_ACK: &str = "checkpoint_ack";
    pub const DISCONNECT: &str = "disconnect";
    pub const JOB_RESULT: &str = "job_result";
    pub const JOB_ERROR: &str = "job_error";
    pub const ERROR: &str = "error";
}

/// Job lifecycle status (§3). Advances monotonically except
/// `running -> failed` on an unrecoverable task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Task lifecycle status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Worker availability (§3). `Gone` workers are never selected by any
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkerAvailability {
    Idle,
    Busy,
    Gone,
}

/// The cause class recorded on a `WorkerFailure` entry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum FailureCause {
    Disconnect,
    TaskError,
    Timeout,
    Reject,
}

/// Error taxonomy surfaced as `kind` in `error`/`job_error` envelopes (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadMessage,
    UnknownMessageType,
    DuplicateWorkerId,
    TaskError,
    WorkerDisconnect,
    Timeout,
    Stuck,
    DeadlineExceeded,
    Internal,
}

impl From<FailureCause> for ErrorKind {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::Disconnect => ErrorKind::WorkerDisconnect,
            FailureCause::TaskError => ErrorKind::TaskError,
            FailureCause::Timeout => ErrorKind::Timeout,
            FailureCause::Reject => ErrorKind::BadMessage,
        }
    }
}

/// `submit_job` payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobData {
    pub func_code: String,
    pub args_list: Vec<Value>,
    pub total_tasks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// `job_accepted` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAcceptedData {
    pub job_id: JobId,
}

/// `get_job_status` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobStatusData {
    pub job_id: JobId,
}

/// `job_status` reply payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusData {
    pub job_id: JobId,
    pub status: JobStatus,
    pub pending: u32,
    pub assigned: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
}

/// `register_worker` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerData {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub specs: WorkerSpecs,
}

/// Device specs reported at registration (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSpecs {
    #[serde(default)]
    pub cpu_freq_ghz: Option<f64>,
    #[serde(default)]
    pub cores: Option<u32>,
    #[serde(default)]
    pub memory_gb: Option<f64>,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    #[serde(default)]
    pub signal_strength: Option<f64>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
}

/// `assign_task` payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskData {
    pub task_id: String,
    pub func_code: String,
    pub task_args: Value,
}

/// `task_result` payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultData {
    pub task_id: String,
    pub result: Value,
}

/// `task_error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorData {
    pub task_id: String,
    pub message: String,
}

/// `error` / `job_error` per-task failure record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task_id: String,
    pub worker_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// `job_result` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultData {
    pub job_id: JobId,
    pub results: Vec<Value>,
}

/// `job_error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorData {
    pub job_id: JobId,
    pub errors: Vec<FailureRecord>,
}

/// `error` reply payload (connection/protocol-level, not job-scoped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub message: String,
}

/// `task_checkpoint` payload. The checkpoint subsystem itself is out of
/// scope; the router only forwards this and acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpointData {
    pub task_id: String,
    pub checkpoint_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrips_through_json() {
        let env = Envelope::new(
            message_type::SUBMIT_JOB,
            serde_json::json!({"func_code": "00", "args_list": [], "total_tasks": 0}),
        );
        let s = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(back.kind, "submit_job");
        assert!(back.job_id.is_none());
    }

    #[test]
    fn envelope_omits_absent_ids() {
        let env = Envelope::new("ping", Value::Null);
        let s = serde_json::to_string(&env).unwrap();
        assert!(!s.contains("job_id"));
        assert!(!s.contains("worker_id"));
    }

    #[test]
    fn decode_data_surfaces_bad_message() {
        let env = Envelope::new("submit_job", serde_json::json!({"oops": true}));
        let result: crate::error::Result<SubmitJobData> = env.decode_data();
        assert!(result.is_err());
    }

    #[test]
    fn failure_cause_maps_to_error_kind() {
        assert_eq!(ErrorKind::from(FailureCause::Disconnect), ErrorKind::WorkerDisconnect);
        assert_eq!(ErrorKind::from(FailureCause::Timeout), ErrorKind::Timeout);
    }
}
