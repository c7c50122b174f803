use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::SchedulerKind;

use super::{PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

/// Walk pending tasks in insertion order; for each, pick any idle worker
/// (§4.4).
pub struct FifoScheduler;

impl Scheduler for FifoScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Fifo
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        let mut workers = eligible.iter().map(|w| w.id.clone());
        pending
            .iter()
            .zip(&mut workers)
            .map(|(task, worker)| (task.task_id.clone(), worker))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_ids::JobId;
    use crowdcompute_protocol::WorkerSpecs;

    fn worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(
            WorkerId::new(id),
            crowdcompute_ids::ConnectionId::new(),
            WorkerSpecs::default(),
        )
    }

    #[test]
    fn pairs_tasks_with_workers_in_order_until_one_side_runs_out() {
        let job = JobId::new("j1");
        let pending = vec![
            PendingTaskView { task_id: TaskId::new(job.clone(), 0), priority: None },
            PendingTaskView { task_id: TaskId::new(job.clone(), 1), priority: None },
            PendingTaskView { task_id: TaskId::new(job, 2), priority: None },
        ];
        let eligible = vec![worker("w1"), worker("w2")];

        let mut scheduler = FifoScheduler;
        let pairs = scheduler.select(&pending, &eligible);

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1, WorkerId::new("w1"));
        assert_eq!(pairs[1].1, WorkerId::new("w2"));
    }
}
