//! Completion handler (§4.8): triggered after every task-state change,
//! detects all-tasks-terminal, aggregates the result (or error) vector
//! in submission order, and notifies the client connection.

use std::sync::Arc;

use crowdcompute_ids::{JobId, TaskId};
use crowdcompute_protocol::{
    message_type, Envelope, ErrorKind, FailureRecord, JobErrorData, JobResultData, JobStatus,
    TaskStatus,
};
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::state::Coordinator;

/// Check `job_id` for all-terminal tasks and finalize it if so. A no-op
/// if the job is missing, already terminal, or still has pending work —
/// safe to call after every task transition without tracking who else
/// might be racing to finalize the same job.
pub async fn check_job_completion(coordinator: &Arc<Coordinator>, job_id: &JobId) -> Result<()> {
    let Some(job_handle) = coordinator.job(job_id).await else {
        return Ok(());
    };

    let registry = coordinator.registry.lock().await;
    let mut job = job_handle.lock().await;

    if !matches!(job.status, JobStatus::Pending | JobStatus::Running) || !job.all_terminal() {
        return Ok(());
    }

    if job.any_failed() {
        let errors: Vec<FailureRecord> = job
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| FailureRecord {
                task_id: TaskId::new(job.id.clone(), t.index).to_string(),
                worker_id: t.assignee.as_ref().map(|w| w.as_str().to_string()),
                kind: ErrorKind::TaskError,
                message: t.last_error.clone().unwrap_or_else(|| "task failed".to_string()),
            })
            .collect();

        job.status = JobStatus::Failed;
        coordinator.db.update_job_status(job.id.as_str(), JobStatus::Failed, None).await?;

        let data = serde_json::to_value(JobErrorData { job_id: job.id.clone(), errors })
            .expect("JobErrorData always serializes");
        let envelope = Envelope::new(message_type::JOB_ERROR, data).with_job_id(job.id.clone());
        let _ = registry.send_to_job_client(&job.id, envelope);
        info!(job_id = %job.id, "job failed");
    } else {
        let results: Vec<Value> = job
            .tasks
            .iter()
            .map(|t| t.result.clone().unwrap_or(Value::Null))
            .collect();
        let result_vector = serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string());

        job.status = JobStatus::Completed;
        coordinator
            .db
            .update_job_status(job.id.as_str(), JobStatus::Completed, Some(&result_vector))
            .await?;

        let data = serde_json::to_value(JobResultData { job_id: job.id.clone(), results })
            .expect("JobResultData always serializes");
        let envelope = Envelope::new(message_type::JOB_RESULT, data).with_job_id(job.id.clone());
        let _ = registry.send_to_job_client(&job.id, envelope);
        info!(job_id = %job.id, "job completed");
    }

    let finished_id = job.id.clone();
    drop(job);
    drop(registry);
    coordinator.evict_job(&finished_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{new_task_record, JobRecord};
    use crowdcompute_ids::ConnectionId;
    use crowdcompute_protocol::ForemanConfig;
    use tokio::sync::{mpsc, Notify};

    async fn coordinator() -> Arc<Coordinator> {
        let db = crowdcompute_db::CrowdComputeDb::connect_single("sqlite::memory:").await.unwrap();
        Coordinator::new(ForemanConfig::default(), db)
    }

    /// §4.8: completion must release the job→connection binding, not
    /// just evict the job, so a stale mapping doesn't outlive the job.
    #[tokio::test]
    async fn completing_a_job_releases_its_client_connection_binding() {
        let coordinator = coordinator().await;
        let job_id = JobId::new("j1");
        let client_conn = ConnectionId::new();

        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let mut registry = coordinator.registry.lock().await;
            registry.open(client_conn, tx, Arc::new(Notify::new()));
            registry.register_client(client_conn, job_id.clone());
        }

        let record = JobRecord {
            id: job_id.clone(),
            func_code: "00".to_string(),
            status: JobStatus::Running,
            checkpoint_interval: None,
            deadline: None,
            client_connection: Some(client_conn),
            tasks: vec![{
                let mut t = new_task_record(0, serde_json::json!([1]), None);
                t.status = TaskStatus::Completed;
                t.result = Some(serde_json::json!(1));
                t
            }],
        };
        coordinator.insert_job(record).await;

        check_job_completion(&coordinator, &job_id).await.unwrap();

        let registry = coordinator.registry.lock().await;
        assert_eq!(registry.client_connection(&job_id), None);
    }
}
