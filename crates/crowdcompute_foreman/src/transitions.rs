//! Shared task-requeue helper used by the router (disconnect cleanup,
//! §4.7) and the supervisor (heartbeat-timeout cleanup, §4.9) — kept in
//! one place so both failure paths persist the same shape of update.

use std::sync::Arc;

use crowdcompute_db::TaskUpdate;
use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::{FailureCause, TaskStatus};

use crate::error::Result;
use crate::state::Coordinator;

/// Return `task_id` to `pending` and record a `WorkerFailure` against
/// `worker_id`. A no-op if the task is already terminal — it may have
/// completed between the caller observing the worker's `current_task`
/// and this call acquiring the job lock.
pub async fn requeue_task(
    coordinator: &Arc<Coordinator>,
    task_id: &TaskId,
    worker_id: &WorkerId,
    cause: FailureCause,
    message: &str,
) -> Result<()> {
    let Some(job_handle) = coordinator.job(&task_id.job_id).await else {
        return Ok(());
    };
    let mut job = job_handle.lock().await;
    let Some(task) = job.tasks.get_mut(task_id.index as usize) else {
        return Ok(());
    };
    if task.status.is_terminal() {
        return Ok(());
    }

    task.status = TaskStatus::Pending;
    task.assignee = None;
    task.assigned_at = None;
    task.last_error = Some(message.to_string());

    coordinator
        .db
        .update_task(
            job.id.as_str(),
            task_id.index as i64,
            TaskUpdate {
                status: Some(TaskStatus::Pending),
                assignee_worker_id: Some(None),
                assigned_at: Some(None),
                last_error: Some(Some(message.to_string())),
                ..Default::default()
            },
        )
        .await?;

    coordinator
        .db
        .record_worker_failure(worker_id.as_str(), job.id.as_str(), task_id.index as i64, cause, message)
        .await?;

    Ok(())
}
