use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::SchedulerKind;

use super::{PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

/// Sort pending tasks by explicit priority (1 = highest); within a
/// priority, FIFO (§4.4). Tasks without a priority sort after every
/// prioritized task but keep their relative insertion order.
pub struct PriorityScheduler;

impl Scheduler for PriorityScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Priority
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        let mut ordered: Vec<&PendingTaskView> = pending.iter().collect();
        ordered.sort_by_key(|t| t.priority.unwrap_or(i32::MAX));

        ordered
            .into_iter()
            .zip(eligible.iter())
            .map(|(task, worker)| (task.task_id.clone(), worker.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcompute_ids::{ConnectionId, JobId};
    use crowdcompute_protocol::WorkerSpecs;

    fn worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(WorkerId::new(id), ConnectionId::new(), WorkerSpecs::default())
    }

    #[test]
    fn lower_priority_number_goes_first() {
        let job = JobId::new("j1");
        let pending = vec![
            PendingTaskView { task_id: TaskId::new(job.clone(), 0), priority: Some(5) },
            PendingTaskView { task_id: TaskId::new(job, 1), priority: Some(1) },
        ];
        let eligible = vec![worker("w1")];

        let mut scheduler = PriorityScheduler;
        let pairs = scheduler.select(&pending, &eligible);
        assert_eq!(pairs[0].0.index, 1);
    }
}
