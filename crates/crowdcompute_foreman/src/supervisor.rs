//! Background supervisor (§4.9): on a fixed interval, sweeps for workers
//! that have stopped heartbeating, tasks stuck assigned/running past a
//! staleness bound, and jobs that have missed their deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crowdcompute_db::WorkerUpdate;
use crowdcompute_ids::WorkerId;
use crowdcompute_protocol::{
    message_type, Envelope, ErrorKind, FailureRecord, JobErrorData, JobStatus, TaskStatus,
    WorkerAvailability,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::state::Coordinator;
use crate::transitions::requeue_task;

/// Spawn the periodic sweep loop, firing once every `supervisor_interval`.
pub fn spawn(coordinator: Arc<Coordinator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(coordinator.config.supervisor_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&coordinator).await;
        }
    })
}

/// Run the three sweeps in sequence. Each is independently a no-op when
/// there's nothing to do, so this is safe to call on every tick.
pub async fn sweep_once(coordinator: &Arc<Coordinator>) {
    sweep_heartbeats(coordinator).await;
    sweep_stale_tasks(coordinator).await;
    sweep_deadlines(coordinator).await;
}

/// Mark workers `gone` once their last heartbeat is older than
/// `heartbeat_timeout`, and requeue whatever task they were holding
/// (§4.9, first bullet).
async fn sweep_heartbeats(coordinator: &Arc<Coordinator>) {
    let timeout = coordinator.config.heartbeat_timeout();
    let now = Utc::now();

    let gone = {
        let mut registry = coordinator.registry.lock().await;
        let mut gone = Vec::new();
        for worker in registry.all_workers() {
            if worker.availability == WorkerAvailability::Gone {
                continue;
            }
            let elapsed = now.signed_duration_since(worker.last_heartbeat);
            if elapsed > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero()) {
                let current_task = worker.current_task.clone();
                if let Some(w) = registry.worker_mut(&worker.id) {
                    w.availability = WorkerAvailability::Gone;
                    w.current_task = None;
                }
                gone.push((worker.id, current_task));
            }
        }
        gone
    };

    for (worker_id, current_task) in gone {
        warn!(worker_id = %worker_id, "heartbeat timeout, marking worker gone");
        if let Err(e) = coordinator
            .db
            .update_worker(
                worker_id.as_str(),
                WorkerUpdate {
                    availability: Some(WorkerAvailability::Gone),
                    current_task_job_id: Some(None),
                    current_task_idx: Some(None),
                    ..Default::default()
                },
            )
            .await
        {
            error!(error = %e, worker_id = %worker_id, "failed to persist heartbeat-timeout worker state");
        }
        if let Some(task_id) = current_task {
            if let Err(e) = requeue_task(
                coordinator,
                &task_id,
                &worker_id,
                crowdcompute_protocol::FailureCause::Timeout,
                "heartbeat timeout",
            )
            .await
            {
                error!(error = %e, task_id = %task_id, "failed to requeue task after heartbeat timeout");
            }
        }
    }
    coordinator.notify_dispatch();
}

/// Return tasks stuck `assigned`/`running` past `task_stale_after` to
/// `pending`, then resolve the holding worker's fate from heartbeat
/// recency — no live probe primitive exists in this protocol, so
/// liveness is inferred the same way [`sweep_heartbeats`] infers it
/// (§4.9, second bullet: "the holding worker is probed").
///
/// No `WorkerFailure` row is recorded here: §3's `FailureCause` enum has
/// no variant for "stuck", only `disconnect | task_error | timeout |
/// reject`. The task's own `last_error` carries the signal instead.
async fn sweep_stale_tasks(coordinator: &Arc<Coordinator>) {
    let stale_after = coordinator.config.task_stale_after();
    let now = Utc::now();
    let mut stalled_workers = Vec::new();

    for job_id in coordinator.job_ids().await {
        let Some(job_handle) = coordinator.job(&job_id).await else { continue };
        let mut job = job_handle.lock().await;
        for task in job.tasks.iter_mut() {
            if !matches!(task.status, TaskStatus::Assigned | TaskStatus::Running) {
                continue;
            }
            let Some(assigned_at) = task.assigned_at else { continue };
            let elapsed = now.signed_duration_since(assigned_at);
            if elapsed <= chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::zero()) {
                continue;
            }

            let holder = task.assignee.clone();
            warn!(job_id = %job_id, task_idx = task.index, "task stale, returning to pending");
            task.status = TaskStatus::Pending;
            task.assignee = None;
            task.assigned_at = None;
            task.last_error = Some("stuck: no progress within stale bound".to_string());

            if let Err(e) = coordinator
                .db
                .update_task(
                    job_id.as_str(),
                    task.index as i64,
                    crowdcompute_db::TaskUpdate {
                        status: Some(TaskStatus::Pending),
                        assignee_worker_id: Some(None),
                        assigned_at: Some(None),
                        last_error: Some(Some("stuck: no progress within stale bound".to_string())),
                        ..Default::default()
                    },
                )
                .await
            {
                error!(error = %e, job_id = %job_id, task_idx = task.index, "failed to persist stale-task revert");
            }

            if let Some(worker_id) = holder {
                stalled_workers.push(worker_id);
            }
        }
    }

    for worker_id in stalled_workers {
        probe_and_release(coordinator, &worker_id, now).await;
    }
    coordinator.notify_dispatch();
}

/// Infer `worker_id`'s liveness from heartbeat recency and release it
/// back to `idle` if recent, or mark it `gone` otherwise (§4.9's
/// "probe" has no RPC counterpart in this protocol).
async fn probe_and_release(coordinator: &Arc<Coordinator>, worker_id: &WorkerId, now: chrono::DateTime<Utc>) {
    let timeout = coordinator.config.heartbeat_timeout();
    let alive = {
        let mut registry = coordinator.registry.lock().await;
        let Some(worker) = registry.worker_mut(worker_id) else { return };
        if worker.availability == WorkerAvailability::Gone {
            return;
        }
        let elapsed = now.signed_duration_since(worker.last_heartbeat);
        let alive = elapsed <= chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        worker.availability = if alive { WorkerAvailability::Idle } else { WorkerAvailability::Gone };
        worker.current_task = None;
        alive
    };

    let result = coordinator
        .db
        .update_worker(
            worker_id.as_str(),
            WorkerUpdate {
                availability: Some(if alive { WorkerAvailability::Idle } else { WorkerAvailability::Gone }),
                current_task_job_id: Some(None),
                current_task_idx: Some(None),
                ..Default::default()
            },
        )
        .await;
    if let Err(e) = result {
        error!(error = %e, worker_id = %worker_id, "failed to persist probed worker state");
    }
    info!(worker_id = %worker_id, alive, "stale task's worker probed via heartbeat recency");
}

/// Fail jobs whose deadline has passed while still `pending`/`running`
/// (§4.9, third bullet).
async fn sweep_deadlines(coordinator: &Arc<Coordinator>) {
    let now = Utc::now();
    let mut expired = Vec::new();

    for job_id in coordinator.job_ids().await {
        let Some(job_handle) = coordinator.job(&job_id).await else { continue };
        let registry = coordinator.registry.lock().await;
        let mut job = job_handle.lock().await;

        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            continue;
        }
        let Some(deadline) = job.deadline else { continue };
        if now <= deadline {
            continue;
        }

        job.status = JobStatus::Failed;
        let errors: Vec<FailureRecord> = job
            .tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| FailureRecord {
                task_id: crowdcompute_ids::TaskId::new(job.id.clone(), t.index).to_string(),
                worker_id: t.assignee.as_ref().map(|w| w.as_str().to_string()),
                kind: ErrorKind::DeadlineExceeded,
                message: "job deadline exceeded".to_string(),
            })
            .collect();

        if let Err(e) = coordinator.db.update_job_status(job.id.as_str(), JobStatus::Failed, None).await {
            error!(error = %e, job_id = %job.id, "failed to persist deadline-exceeded job status");
        }

        let data = serde_json::to_value(JobErrorData { job_id: job.id.clone(), errors })
            .expect("JobErrorData always serializes");
        let envelope = Envelope::new(message_type::JOB_ERROR, data).with_job_id(job.id.clone());
        let _ = registry.send_to_job_client(&job.id, envelope);
        warn!(job_id = %job.id, "job deadline exceeded");

        expired.push(job.id.clone());
    }

    for job_id in expired {
        coordinator.evict_job(&job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_ids::ConnectionId;
    use crowdcompute_protocol::WorkerSpecs;

    async fn test_coordinator() -> Arc<Coordinator> {
        let db = crowdcompute_db::CrowdComputeDb::connect_single("sqlite::memory:").await.unwrap();
        Coordinator::new(crowdcompute_protocol::ForemanConfig::default(), db)
    }

    #[tokio::test]
    async fn sweep_heartbeats_marks_silent_worker_gone() {
        let coordinator = test_coordinator().await;
        let worker_id = WorkerId::new("w1");
        {
            let mut registry = coordinator.registry.lock().await;
            registry.register_worker(ConnectionId::new(), worker_id.clone(), WorkerSpecs::default());
            let worker = registry.worker_mut(&worker_id).unwrap();
            worker.last_heartbeat = Utc::now() - chrono::Duration::hours(1);
        }
        coordinator
            .db
            .upsert_worker(worker_id.as_str(), &WorkerSpecs::default())
            .await
            .unwrap();

        sweep_heartbeats(&coordinator).await;

        let registry = coordinator.registry.lock().await;
        assert_eq!(registry.worker(&worker_id).unwrap().availability, WorkerAvailability::Gone);
    }
}
