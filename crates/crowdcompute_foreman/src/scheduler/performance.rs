use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::SchedulerKind;

use super::{PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

/// Score workers as `reliability * (1 / (1 + recent_avg_exec_time))` and
/// assign the highest-scoring worker to the highest-priority pending
/// task, repeating until one side is exhausted (§4.4). Reliability
/// itself is mutated by the router on task completion/failure, not by
/// the scheduler — this strategy only reads it.
#[derive(Default)]
pub struct PerformanceScheduler;

fn score(w: &WorkerRecord) -> f64 {
    w.reliability_score * (1.0 / (1.0 + w.recent_avg_exec_time()))
}

impl Scheduler for PerformanceScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Performance
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        let mut ranked_tasks: Vec<&PendingTaskView> = pending.iter().collect();
        ranked_tasks.sort_by_key(|t| t.priority.unwrap_or(i32::MAX));

        let mut ranked_workers: Vec<&WorkerRecord> = eligible.iter().collect();
        ranked_workers.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal));

        ranked_tasks
            .into_iter()
            .zip(ranked_workers)
            .map(|(task, worker)| (task.task_id.clone(), worker.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_ids::{ConnectionId, JobId};
    use crowdcompute_protocol::WorkerSpecs;

    fn worker(id: &str, reliability: f64, avg_exec: f64) -> WorkerRecord {
        let mut w = WorkerRecord::new(WorkerId::new(id), ConnectionId::new(), WorkerSpecs::default());
        w.reliability_score = reliability;
        w.total_exec_time_secs = avg_exec;
        w.tasks_completed = 1;
        w
    }

    #[test]
    fn highest_priority_task_gets_highest_scoring_worker() {
        let job = JobId::new("j1");
        let pending = vec![
            PendingTaskView { task_id: TaskId::new(job.clone(), 0), priority: Some(2) },
            PendingTaskView { task_id: TaskId::new(job, 1), priority: Some(1) },
        ];
        let reliable = worker("reliable", 0.95, 1.0);
        let flaky = worker("flaky", 0.2, 1.0);

        let mut scheduler = PerformanceScheduler;
        let pairs = scheduler.select(&pending, &[flaky, reliable]);

        let top_priority_pair = pairs.iter().find(|(t, _)| t.index == 1).unwrap();
        assert_eq!(top_priority_pair.1, WorkerId::new("reliable"));
    }
}
