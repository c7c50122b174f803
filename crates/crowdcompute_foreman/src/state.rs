//! In-memory Job/Task/Worker records and the coordinator that owns every
//! registry, cache, and lock (§3 Data Model, §5 Concurrency model).
//!
//! Lock ordering is always **registry → job**, matching §5: the registry
//! lock guards [`crate::registry::Registry`] (connections and worker
//! state); the per-job lock guards one job's tasks. Persistence writes
//! happen while the corresponding in-memory lock is held so a reader of
//! the store after a handler returns sees a consistent view.

use chrono::{DateTime, Utc};
use crowdcompute_ids::{ConnectionId, JobId, TaskId, WorkerId};
use crowdcompute_protocol::{
    ForemanConfig, JobStatus, SchedulerKind, TaskStatus, WorkerAvailability, WorkerSpecs,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::registry::Registry;
use crate::scheduler::{new_scheduler, Scheduler};

/// One task's in-memory state (§3 Task).
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub index: u32,
    pub args: Value,
    pub status: TaskStatus,
    pub assignee: Option<WorkerId>,
    pub attempts: u32,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub result: Option<Value>,
    pub last_error: Option<String>,
}

impl TaskRecord {
    fn new(index: u32, args: Value, priority: Option<i32>) -> Self {
        Self {
            index,
            args,
            status: TaskStatus::Pending,
            assignee: None,
            attempts: 0,
            assigned_at: None,
            last_heartbeat: None,
            priority,
            result: None,
            last_error: None,
        }
    }
}

/// One job's in-memory state plus its child tasks (§3 Job).
///
/// Access to a job's tasks is always mediated through the `Arc<Mutex<_>>`
/// wrapping this struct — that mutex *is* the "per-job mutex" of §5.
#[derive(Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub func_code: String,
    pub status: JobStatus,
    pub checkpoint_interval: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub client_connection: Option<ConnectionId>,
    pub tasks: Vec<TaskRecord>,
}

impl JobRecord {
    pub fn total_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }
}

pub type JobHandle = Arc<Mutex<JobRecord>>;

/// Everything the foreman owns for the lifetime of the process (§9: "a
/// single value owning all registries, caches, and locks").
pub struct Coordinator {
    pub config: ForemanConfig,
    pub db: crowdcompute_db::CrowdComputeDb,
    pub registry: Mutex<Registry>,
    jobs: RwLock<HashMap<JobId, JobHandle>>,
    function_cache: Mutex<HashMap<JobId, Arc<String>>>,
    pub scheduler: Mutex<Box<dyn Scheduler>>,
    pub dispatch_notify: Notify,
}

impl Coordinator {
    pub fn new(config: ForemanConfig, db: crowdcompute_db::CrowdComputeDb) -> Arc<Self> {
        let scheduler = new_scheduler(config.scheduler);
        Arc::new(Self {
            config,
            db,
            registry: Mutex::new(Registry::default()),
            jobs: RwLock::new(HashMap::new()),
            function_cache: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(scheduler),
            dispatch_notify: Notify::new(),
        })
    }

    pub async fn insert_job(&self, record: JobRecord) -> JobHandle {
        let id = record.id.clone();
        self.function_cache
            .lock()
            .await
            .insert(id.clone(), Arc::new(record.func_code.clone()));
        let handle = Arc::new(Mutex::new(record));
        self.jobs.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn job(&self, id: &JobId) -> Option<JobHandle> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn job_ids(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Cached function blob for a job, avoiding a re-fetch per `assign_task`
    /// (§4.5). Evicted at job-terminal via [`Coordinator::evict_job`].
    pub async fn cached_function(&self, id: &JobId) -> Option<Arc<String>> {
        self.function_cache.lock().await.get(id).cloned()
    }

    /// Drop the job from the live index, its cached function blob, and
    /// its client-connection binding (§4.8: evict at completion, and
    /// "release the job's client-connection binding"). Callers must not
    /// already be holding the registry lock.
    pub async fn evict_job(&self, id: &JobId) {
        self.jobs.write().await.remove(id);
        self.function_cache.lock().await.remove(id);
        self.registry.lock().await.release_job_client(id);
    }

    pub fn notify_dispatch(&self) {
        self.dispatch_notify.notify_one();
    }

    pub async fn set_scheduler(&self, kind: SchedulerKind) {
        let mut guard = self.scheduler.lock().await;
        *guard = new_scheduler(kind);
    }
}

pub fn new_task_record(index: u32, args: Value, priority: Option<i32>) -> TaskRecord {
    TaskRecord::new(index, args, priority)
}

/// In-memory mirror of a worker's device specs and rolling stats (§3
/// Worker), owned by the [`Registry`] under the registry lock.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub connection_id: Option<ConnectionId>,
    pub availability: WorkerAvailability,
    pub current_task: Option<TaskId>,
    pub specs: WorkerSpecs,
    pub reliability_score: f64,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub total_exec_time_secs: f64,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, connection_id: ConnectionId, specs: WorkerSpecs) -> Self {
        Self {
            id,
            connection_id: Some(connection_id),
            availability: WorkerAvailability::Idle,
            current_task: None,
            specs,
            reliability_score: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            total_exec_time_secs: 0.0,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn recent_avg_exec_time(&self) -> f64 {
        let completions = self.tasks_completed.max(1) as f64;
        self.total_exec_time_secs / completions
    }

    /// Record a successful task execution. Reliability recovers linearly
    /// over completions (§4.4 Performance strategy).
    pub fn record_completion(&mut self, exec_secs: f64) {
        self.tasks_completed += 1;
        self.total_exec_time_secs += exec_secs.max(0.0);
        self.reliability_score = (self.reliability_score + RELIABILITY_RECOVERY_STEP).min(1.0);
    }

    /// Record a failed task execution. Reliability decays after each
    /// failure (§4.4 Performance strategy).
    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.reliability_score = (self.reliability_score - RELIABILITY_DECAY).max(0.0);
    }
}

const RELIABILITY_DECAY: f64 = 0.2;
const RELIABILITY_RECOVERY_STEP: f64 = 0.05;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_scheduler_swaps_the_active_strategy_without_touching_in_flight_jobs() {
        let db = crowdcompute_db::CrowdComputeDb::connect_single("sqlite::memory:").await.unwrap();
        let coordinator = Coordinator::new(ForemanConfig::default(), db);
        assert_eq!(coordinator.scheduler.lock().await.kind(), SchedulerKind::Fifo);

        let record = JobRecord {
            id: JobId::new("j1"),
            func_code: "00".to_string(),
            status: JobStatus::Running,
            checkpoint_interval: None,
            deadline: None,
            client_connection: None,
            tasks: vec![new_task_record(0, serde_json::json!([1]), None)],
        };
        coordinator.insert_job(record).await;

        // §8 scenario 6: reconfigure mid-flight via the admin toggle;
        // the in-flight job's own state is untouched by the swap.
        coordinator.set_scheduler(SchedulerKind::RoundRobin).await;
        assert_eq!(coordinator.scheduler.lock().await.kind(), SchedulerKind::RoundRobin);

        let job = coordinator.job(&JobId::new("j1")).await.unwrap();
        let job = job.lock().await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.tasks.len(), 1);
    }
}
