use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::SchedulerKind;

use super::{PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

/// Pick the idle worker with the lowest `(active_tasks,
/// recent_avg_exec_time)` key; ties broken by worker-id lex order
/// (§4.4). `active_tasks` is always 0 among `idle` workers under the
/// default single-concurrent-task-per-worker limit, so in practice this
/// degenerates to "fastest recently-observed worker, then lowest id" —
/// the tuple is kept so raising `max_concurrent_tasks` changes behavior
/// without changing this strategy.
pub struct LeastLoadedScheduler;

fn load_key(w: &WorkerRecord) -> (u32, u64, &str) {
    let active_tasks = u32::from(w.current_task.is_some());
    let exec_time_key = (w.recent_avg_exec_time() * 1000.0) as u64;
    (active_tasks, exec_time_key, w.id.as_str())
}

impl Scheduler for LeastLoadedScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::LeastLoaded
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        let mut ordered: Vec<&WorkerRecord> = eligible.iter().collect();
        ordered.sort_by_key(|w| load_key(w));

        pending
            .iter()
            .zip(ordered.iter())
            .map(|(task, worker)| (task.task_id.clone(), worker.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_ids::{ConnectionId, JobId};
    use crowdcompute_protocol::WorkerSpecs;

    fn worker_with_exec_time(id: &str, total_exec_time_secs: f64, completed: u32) -> WorkerRecord {
        let mut w = WorkerRecord::new(WorkerId::new(id), ConnectionId::new(), WorkerSpecs::default());
        w.total_exec_time_secs = total_exec_time_secs;
        w.tasks_completed = completed;
        w
    }

    #[test]
    fn prefers_the_worker_with_lower_average_execution_time() {
        let job = JobId::new("j1");
        let pending = vec![PendingTaskView { task_id: TaskId::new(job, 0), priority: None }];
        let slow = worker_with_exec_time("slow", 20.0, 2);
        let fast = worker_with_exec_time("fast", 2.0, 2);

        let mut scheduler = LeastLoadedScheduler;
        let pairs = scheduler.select(&pending, &[slow, fast]);
        assert_eq!(pairs[0].1, WorkerId::new("fast"));
    }

    #[test]
    fn ties_broken_by_worker_id_lex_order() {
        let job = JobId::new("j1");
        let pending = vec![PendingTaskView { task_id: TaskId::new(job, 0), priority: None }];
        let b = worker_with_exec_time("wb", 0.0, 0);
        let a = worker_with_exec_time("wa", 0.0, 0);

        let mut scheduler = LeastLoadedScheduler;
        let pairs = scheduler.select(&pending, &[b, a]);
        assert_eq!(pairs[0].1, WorkerId::new("wa"));
    }
}
