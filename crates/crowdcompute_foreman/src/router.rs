//! Message router (§4.7): owns one accepted TCP connection end to end —
//! registers it, demultiplexes incoming envelopes by `type`, and runs
//! the cleanup path shared by an explicit `disconnect` and a bare EOF.

use std::sync::Arc;

use chrono::Utc;
use crowdcompute_db::WorkerUpdate;
use crowdcompute_ids::{ConnectionId, JobId, TaskId, WorkerId};
use crowdcompute_protocol::{
    message_type, Envelope, ErrorData, ErrorKind, FailureCause, GetJobStatusData, JobAcceptedData,
    JobStatusData, ProtocolError, RegisterWorkerData, SubmitJobData, TaskCheckpointData,
    TaskErrorData, TaskResultData, TaskStatus, WorkerAvailability,
};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use crate::completion;
use crate::error::{ForemanError, Result};
use crate::job_manager;
use crate::state::Coordinator;
use crate::transitions::requeue_task;

/// Drive one accepted connection for its entire lifetime: register it,
/// spawn its dedicated writer, run the read loop, then clean up as if a
/// `disconnect` had arrived.
pub async fn handle_connection(coordinator: Arc<Coordinator>, stream: TcpStream) {
    let conn_id = ConnectionId::new();
    let cancel = Arc::new(Notify::new());
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    {
        let mut registry = coordinator.registry.lock().await;
        registry.open(conn_id, tx, cancel.clone());
    }

    let writer_coordinator = coordinator.clone();
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        let send_timeout = writer_coordinator.config.send_timeout();
        while let Some(envelope) = rx.recv().await {
            match tokio::time::timeout(
                send_timeout,
                crowdcompute_protocol::write_envelope(&mut write_half, &envelope),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(connection = %conn_id, error = %e, "failed to write envelope, connection writer stopping");
                    break;
                }
                Err(_) => {
                    // §5/§7: a send exceeding the bound is treated as a
                    // disconnect, same as an I/O error from the write itself.
                    warn!(connection = %conn_id, "send timed out, treating as disconnect");
                    break;
                }
            }
        }
        // Proactively run the same cleanup the read side runs on EOF, and
        // wake the reader so it doesn't keep blocking on a socket whose
        // writer has already given up. `on_connection_closed` is a no-op
        // if the read side already cleaned up first.
        on_connection_closed(&writer_coordinator, conn_id).await;
        writer_cancel.notify_one();
    });

    read_loop(&coordinator, conn_id, read_half, &cancel).await;

    on_connection_closed(&coordinator, conn_id).await;
    writer_task.abort();
}

async fn read_loop<R: AsyncRead + Unpin>(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    mut reader: R,
    cancel: &Notify,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.notified() => {
                info!(connection = %conn_id, "connection forced closed (duplicate_worker_id)");
                return;
            }
            frame = crowdcompute_protocol::read_envelope(&mut reader) => {
                match frame {
                    Ok(envelope) => handle_envelope(coordinator, conn_id, envelope).await,
                    Err(ProtocolError::ConnectionClosed) => return,
                    Err(e) => {
                        warn!(connection = %conn_id, error = %e, "frame error, closing connection");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_envelope(coordinator: &Arc<Coordinator>, conn_id: ConnectionId, envelope: Envelope) {
    let kind = envelope.kind.clone();
    let result = match kind.as_str() {
        message_type::SUBMIT_JOB => handle_submit_job(coordinator, conn_id, envelope).await,
        message_type::GET_JOB_STATUS => handle_get_job_status(coordinator, conn_id, envelope).await,
        message_type::REGISTER_WORKER => handle_register_worker(coordinator, conn_id, envelope).await,
        message_type::WORKER_READY => handle_worker_ready(coordinator, envelope).await,
        message_type::TASK_RESULT => handle_task_result(coordinator, envelope).await,
        message_type::TASK_ERROR => handle_task_error(coordinator, envelope).await,
        message_type::WORKER_HEARTBEAT | message_type::PING => {
            handle_heartbeat(coordinator, conn_id, &envelope).await
        }
        message_type::TASK_CHECKPOINT => handle_checkpoint(coordinator, conn_id, envelope).await,
        message_type::DISCONNECT => {
            on_connection_closed(coordinator, conn_id).await;
            Ok(())
        }
        other => {
            let data = serde_json::to_value(ErrorData {
                kind: ErrorKind::UnknownMessageType,
                message: format!("unrecognized message type '{other}'"),
            })
            .expect("ErrorData always serializes");
            send(coordinator, conn_id, Envelope::new(message_type::ERROR, data)).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(connection = %conn_id, kind = %kind, error = %e, "handler error");
    }
}

async fn send(coordinator: &Arc<Coordinator>, conn_id: ConnectionId, envelope: Envelope) {
    let registry = coordinator.registry.lock().await;
    if registry.send(conn_id, envelope).is_err() {
        warn!(connection = %conn_id, "failed to queue outbound envelope");
    }
}

async fn handle_submit_job(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    envelope: Envelope,
) -> Result<()> {
    let submission: SubmitJobData = envelope.decode_data()?;
    let job_id = envelope.job_id.clone().unwrap_or_else(JobId::mint);

    let job_id = job_manager::submit_job(coordinator, job_id, conn_id, submission).await?;

    let data = serde_json::to_value(JobAcceptedData { job_id: job_id.clone() })
        .expect("JobAcceptedData always serializes");
    send(
        coordinator,
        conn_id,
        Envelope::new(message_type::JOB_ACCEPTED, data).with_job_id(job_id),
    )
    .await;
    coordinator.notify_dispatch();
    Ok(())
}

async fn handle_get_job_status(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    envelope: Envelope,
) -> Result<()> {
    let req: GetJobStatusData = envelope.decode_data()?;
    let Some(job_handle) = coordinator.job(&req.job_id).await else {
        let data = serde_json::to_value(ErrorData {
            kind: ErrorKind::BadMessage,
            message: format!("unknown job {}", req.job_id),
        })
        .expect("ErrorData always serializes");
        send(coordinator, conn_id, Envelope::new(message_type::ERROR, data)).await;
        return Ok(());
    };

    let job = job_handle.lock().await;
    let (mut pending, mut assigned, mut running, mut completed, mut failed) = (0, 0, 0, 0, 0);
    for task in &job.tasks {
        match task.status {
            TaskStatus::Pending => pending += 1,
            TaskStatus::Assigned => assigned += 1,
            TaskStatus::Running => running += 1,
            TaskStatus::Completed => completed += 1,
            TaskStatus::Failed => failed += 1,
        }
    }
    let data = serde_json::to_value(JobStatusData {
        job_id: job.id.clone(),
        status: job.status,
        pending,
        assigned,
        running,
        completed,
        failed,
    })
    .expect("JobStatusData always serializes");
    drop(job);

    send(coordinator, conn_id, Envelope::new(message_type::JOB_STATUS, data)).await;
    Ok(())
}

async fn handle_register_worker(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    envelope: Envelope,
) -> Result<()> {
    let req: RegisterWorkerData = envelope.decode_data()?;
    let worker_id = req.worker_id.clone();
    let prior = {
        let mut registry = coordinator.registry.lock().await;
        let prior = registry.register_worker(conn_id, worker_id.clone(), req.specs.clone());
        if let Some(prior_conn) = prior {
            registry.close(prior_conn);
        }
        prior
    };
    if prior.is_some() {
        info!(worker_id = %worker_id, "duplicate_worker_id: closed prior connection");
    }

    coordinator.db.upsert_worker(worker_id.as_str(), &req.specs).await?;
    coordinator.notify_dispatch();
    Ok(())
}

/// §4.7: transition `busy -> idle` only if the worker's current task has
/// already been finalized. Every handler that finalizes a task clears
/// `current_task` in the same lock scope, so that field being `None` here
/// already encodes "finalized".
async fn handle_worker_ready(coordinator: &Arc<Coordinator>, envelope: Envelope) -> Result<()> {
    let Some(worker_id) = envelope.worker_id.clone() else {
        return Ok(());
    };

    let became_idle = {
        let mut registry = coordinator.registry.lock().await;
        match registry.worker_mut(&worker_id) {
            Some(worker) if worker.current_task.is_none() && worker.availability == WorkerAvailability::Busy => {
                worker.availability = WorkerAvailability::Idle;
                true
            }
            _ => false,
        }
    };

    if became_idle {
        coordinator
            .db
            .update_worker(
                worker_id.as_str(),
                WorkerUpdate { availability: Some(WorkerAvailability::Idle), ..Default::default() },
            )
            .await?;
        coordinator.notify_dispatch();
    }
    Ok(())
}

async fn handle_task_result(coordinator: &Arc<Coordinator>, envelope: Envelope) -> Result<()> {
    let data: TaskResultData = envelope.decode_data()?;
    let Some(task_id) = TaskId::parse(&data.task_id) else {
        return Err(ForemanError::Internal(format!("malformed task_id '{}'", data.task_id)));
    };
    let Some(job_handle) = coordinator.job(&task_id.job_id).await else {
        warn!(task_id = %task_id, "task_result for unknown job, ignored");
        return Ok(());
    };

    let mut registry = coordinator.registry.lock().await;
    let mut job = job_handle.lock().await;
    let Some(task) = job.tasks.get_mut(task_id.index as usize) else {
        warn!(task_id = %task_id, "task_result for unknown task index, ignored");
        return Ok(());
    };
    if task.status == TaskStatus::Completed {
        info!(task_id = %task_id, "duplicate task_result for completed task, ignored");
        return Ok(());
    }

    let now = Utc::now();
    let exec_secs = task
        .assigned_at
        .map(|at| (now - at).num_milliseconds().max(0) as f64 / 1000.0)
        .unwrap_or(0.0);
    let assignee = task.assignee.clone();

    task.status = TaskStatus::Completed;
    task.result = Some(data.result.clone());
    task.last_error = None;

    if let Err(e) = coordinator
        .db
        .update_task(
            job.id.as_str(),
            task_id.index as i64,
            crowdcompute_db::TaskUpdate {
                status: Some(TaskStatus::Completed),
                result_blob: Some(Some(data.result.to_string())),
                ..Default::default()
            },
        )
        .await
    {
        error!(error = %e, task_id = %task_id, "failed to persist task completion");
    }

    if let Some(worker_id) = &assignee {
        if let Some(worker) = registry.worker_mut(worker_id) {
            worker.availability = WorkerAvailability::Idle;
            worker.current_task = None;
            worker.record_completion(exec_secs);
            let update = WorkerUpdate {
                availability: Some(WorkerAvailability::Idle),
                current_task_job_id: Some(None),
                current_task_idx: Some(None),
                reliability_score: Some(worker.reliability_score),
                tasks_completed: Some(worker.tasks_completed as i64),
                total_exec_time_secs: Some(worker.total_exec_time_secs),
                ..Default::default()
            };
            if let Err(e) = coordinator.db.update_worker(worker_id.as_str(), update).await {
                error!(error = %e, worker_id = %worker_id, "failed to persist worker completion stats");
            }
        }
    }

    let job_id = job.id.clone();
    drop(job);
    drop(registry);

    completion::check_job_completion(coordinator, &job_id).await?;
    coordinator.notify_dispatch();
    Ok(())
}

async fn handle_task_error(coordinator: &Arc<Coordinator>, envelope: Envelope) -> Result<()> {
    let data: TaskErrorData = envelope.decode_data()?;
    let Some(task_id) = TaskId::parse(&data.task_id) else {
        return Err(ForemanError::Internal(format!("malformed task_id '{}'", data.task_id)));
    };
    let Some(job_handle) = coordinator.job(&task_id.job_id).await else {
        warn!(task_id = %task_id, "task_error for unknown job, ignored");
        return Ok(());
    };

    let mut registry = coordinator.registry.lock().await;
    let mut job = job_handle.lock().await;
    let Some(task) = job.tasks.get_mut(task_id.index as usize) else {
        warn!(task_id = %task_id, "task_error for unknown task index, ignored");
        return Ok(());
    };
    if task.status.is_terminal() {
        info!(task_id = %task_id, "task_error for already-terminal task, ignored");
        return Ok(());
    }

    let assignee = task.assignee.clone();
    let will_retry = task.attempts < coordinator.config.max_attempts;

    task.last_error = Some(data.message.clone());
    task.status = if will_retry { TaskStatus::Pending } else { TaskStatus::Failed };
    if will_retry {
        task.assignee = None;
        task.assigned_at = None;
    }

    if let Err(e) = coordinator
        .db
        .update_task(
            job.id.as_str(),
            task_id.index as i64,
            crowdcompute_db::TaskUpdate {
                status: Some(task.status),
                assignee_worker_id: if will_retry { Some(None) } else { None },
                assigned_at: if will_retry { Some(None) } else { None },
                last_error: Some(Some(data.message.clone())),
                ..Default::default()
            },
        )
        .await
    {
        error!(error = %e, task_id = %task_id, "failed to persist task_error transition");
    }

    if let Some(worker_id) = &assignee {
        if let Some(worker) = registry.worker_mut(worker_id) {
            worker.availability = WorkerAvailability::Idle;
            worker.current_task = None;
            worker.record_failure();
            let update = WorkerUpdate {
                availability: Some(WorkerAvailability::Idle),
                current_task_job_id: Some(None),
                current_task_idx: Some(None),
                reliability_score: Some(worker.reliability_score),
                tasks_failed: Some(worker.tasks_failed as i64),
                ..Default::default()
            };
            if let Err(e) = coordinator.db.update_worker(worker_id.as_str(), update).await {
                error!(error = %e, worker_id = %worker_id, "failed to persist worker failure stats");
            }
        }
        if let Err(e) = coordinator
            .db
            .record_worker_failure(
                worker_id.as_str(),
                job.id.as_str(),
                task_id.index as i64,
                FailureCause::TaskError,
                &data.message,
            )
            .await
        {
            error!(error = %e, "failed to persist worker failure record");
        }
    }

    let job_id = job.id.clone();
    drop(job);
    drop(registry);

    if !will_retry {
        completion::check_job_completion(coordinator, &job_id).await?;
    }
    coordinator.notify_dispatch();
    Ok(())
}

async fn handle_heartbeat(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    envelope: &Envelope,
) -> Result<()> {
    if let Some(worker_id) = envelope.worker_id.clone() {
        let now = Utc::now();
        {
            let mut registry = coordinator.registry.lock().await;
            if let Some(worker) = registry.worker_mut(&worker_id) {
                worker.last_heartbeat = now;
            }
        }
        if let Err(e) = coordinator
            .db
            .update_worker(
                worker_id.as_str(),
                WorkerUpdate { last_heartbeat: Some(Some(now)), ..Default::default() },
            )
            .await
        {
            error!(error = %e, worker_id = %worker_id, "failed to persist heartbeat");
        }
    }

    if envelope.kind == message_type::PING {
        send(coordinator, conn_id, Envelope::new(message_type::PONG, serde_json::Value::Null)).await;
    }
    Ok(())
}

/// The checkpoint subsystem is out of scope (§1); the router only
/// forwards the envelope's existence and acknowledges it.
async fn handle_checkpoint(
    coordinator: &Arc<Coordinator>,
    conn_id: ConnectionId,
    envelope: Envelope,
) -> Result<()> {
    let data: TaskCheckpointData = envelope.decode_data()?;
    send(
        coordinator,
        conn_id,
        Envelope::new(message_type::CHECKPOINT_ACK, serde_json::json!({"task_id": data.task_id})),
    )
    .await;
    Ok(())
}

/// Shared cleanup for an explicit `disconnect` and a bare EOF/forced
/// close: release the connection, mark any bound worker `gone`, and
/// requeue its current task (§4.3, §4.7).
async fn on_connection_closed(coordinator: &Arc<Coordinator>, conn_id: ConnectionId) {
    let worker_id: WorkerId;
    let current_task: Option<TaskId>;
    {
        let mut registry = coordinator.registry.lock().await;
        let Some(w) = registry.close(conn_id) else { return };
        current_task = registry.worker(&w).and_then(|wr| wr.current_task.clone());
        if let Some(worker) = registry.worker_mut(&w) {
            worker.availability = WorkerAvailability::Gone;
            worker.current_task = None;
        }
        worker_id = w;
    }

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
        error!(error = %e, worker_id = %worker_id, "failed to persist worker-gone state");
    }

    if let Some(task_id) = current_task {
        if let Err(e) = requeue_task(
            coordinator,
            &task_id,
            &worker_id,
            FailureCause::Disconnect,
            "worker connection closed",
        )
        .await
        {
            error!(error = %e, task_id = %task_id, "failed to requeue task after disconnect");
        }
    }

    coordinator.notify_dispatch();
}
