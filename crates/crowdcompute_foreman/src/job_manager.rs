//! Job manager (§4.5): turns a `submit_job` into persisted job + task
//! records and an in-memory [`JobRecord`].

use crowdcompute_db::repo::NewTask;
use crowdcompute_ids::{ConnectionId, JobId};
use crowdcompute_protocol::{JobStatus, SubmitJobData};
use std::sync::Arc;

use crate::completion;
use crate::error::{ForemanError, Result};
use crate::state::{new_task_record, Coordinator, JobRecord};

/// Validate and persist a submission, returning the minted/echoed job id.
///
/// Per §4.5: validates `total_tasks == |args_list|`, persists the job and
/// all child tasks in one transaction, caches the function blob, and
/// registers the submitting connection as the job's client.
pub async fn submit_job(
    coordinator: &Arc<Coordinator>,
    job_id: JobId,
    client_conn: ConnectionId,
    submission: SubmitJobData,
) -> Result<JobId> {
    if submission.total_tasks as usize != submission.args_list.len() {
        return Err(ForemanError::Internal(format!(
            "total_tasks ({}) does not match args_list length ({})",
            submission.total_tasks,
            submission.args_list.len()
        )));
    }

    let db_tasks: Vec<NewTask> = submission
        .args_list
        .iter()
        .enumerate()
        .map(|(idx, args)| NewTask {
            idx: idx as i64,
            args_blob: args.to_string(),
            priority: submission.priority.map(|p| p as i64),
        })
        .collect();

    coordinator
        .db
        .create_job(
            job_id.as_str(),
            &submission.func_code,
            submission.total_tasks as i64,
            submission.checkpoint_interval,
            None,
            Some(&client_conn.to_string()),
            &db_tasks,
        )
        .await?;

    let tasks = submission
        .args_list
        .into_iter()
        .enumerate()
        .map(|(idx, args)| new_task_record(idx as u32, args, submission.priority))
        .collect();

    let record = JobRecord {
        id: job_id.clone(),
        func_code: submission.func_code,
        status: JobStatus::Pending,
        checkpoint_interval: submission.checkpoint_interval,
        deadline: None,
        client_connection: Some(client_conn),
        tasks,
    };

    coordinator.insert_job(record).await;

    {
        let mut registry = coordinator.registry.lock().await;
        registry.register_client(client_conn, job_id.clone());
    }

    if submission.total_tasks == 0 {
        // §8 boundary: a zero-task job completes immediately with an
        // empty result vector. Route it through the same completion
        // handler as every other job so it gets evicted and the client
        // gets its `job_result`, instead of a one-off shortcut here.
        completion::check_job_completion(coordinator, &job_id).await?;
    }

    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_protocol::ForemanConfig;

    async fn coordinator() -> Arc<Coordinator> {
        let db = crowdcompute_db::CrowdComputeDb::connect_single("sqlite::memory:").await.unwrap();
        Coordinator::new(ForemanConfig::default(), db)
    }

    #[tokio::test]
    async fn rejects_mismatched_total_tasks() {
        let coordinator = coordinator().await;
        let submission = SubmitJobData {
            func_code: "00".to_string(),
            args_list: vec![serde_json::json!([1])],
            total_tasks: 2,
            checkpoint_interval: None,
            priority: None,
        };

        let result = submit_job(&coordinator, JobId::new("j1"), ConnectionId::new(), submission).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_task_job_completes_immediately() {
        let coordinator = coordinator().await;
        let submission = SubmitJobData {
            func_code: "00".to_string(),
            args_list: vec![],
            total_tasks: 0,
            checkpoint_interval: None,
            priority: None,
        };

        let job_id = submit_job(&coordinator, JobId::new("j1"), ConnectionId::new(), submission)
            .await
            .unwrap();

        // The completion handler evicts a finished job from the live
        // index, so its absence here *is* the "completed" signal.
        assert!(coordinator.job(&job_id).await.is_none());
        let row = coordinator.db.query_job(job_id.as_str()).await.unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.result_vector.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn happy_path_creates_pending_job_with_tasks() {
        let coordinator = coordinator().await;
        let submission = SubmitJobData {
            func_code: "00".to_string(),
            args_list: vec![serde_json::json!([1]), serde_json::json!([2]), serde_json::json!([3])],
            total_tasks: 3,
            checkpoint_interval: None,
            priority: None,
        };

        let job_id = submit_job(&coordinator, JobId::new("j1"), ConnectionId::new(), submission)
            .await
            .unwrap();

        let job = coordinator.job(&job_id).await.unwrap();
        let job = job.lock().await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.tasks.len(), 3);
    }
}
