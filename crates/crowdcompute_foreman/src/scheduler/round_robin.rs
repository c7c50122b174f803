use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::SchedulerKind;

use super::{PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

/// Maintain a rotating cursor over idle workers, lexicographically
/// ordered so the cursor position is meaningful across calls even as
/// the idle set's membership changes (§4.4).
#[derive(Default)]
pub struct RoundRobinScheduler {
    cursor: usize,
}

impl Scheduler for RoundRobinScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::RoundRobin
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        if eligible.is_empty() {
            return Vec::new();
        }
        let mut ordered: Vec<&WorkerRecord> = eligible.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut pairs = Vec::new();
        for task in pending.iter().take(ordered.len()) {
            let worker = ordered[self.cursor % ordered.len()];
            pairs.push((task.task_id.clone(), worker.id.clone()));
            self.cursor = (self.cursor + 1) % ordered.len();
        }
        pairs
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
    fn single_worker_degenerates_to_serial_fifo() {
        let job = JobId::new("j1");
        let pending = vec![PendingTaskView { task_id: TaskId::new(job, 0), priority: None }];
        let eligible = vec![worker("only")];

        let mut scheduler = RoundRobinScheduler::default();
        let first = scheduler.select(&pending, &eligible);
        assert_eq!(first[0].1, WorkerId::new("only"));
        let second = scheduler.select(&pending, &eligible);
        assert_eq!(second[0].1, WorkerId::new("only"));
    }

    #[test]
    fn cursor_advances_across_calls() {
        let job = JobId::new("j1");
        let one_task = |i: u32| vec![PendingTaskView { task_id: TaskId::new(job.clone(), i), priority: None }];
        let eligible = vec![worker("w1"), worker("w2")];

        let mut scheduler = RoundRobinScheduler::default();
        let a = scheduler.select(&one_task(0), &eligible);
        let b = scheduler.select(&one_task(1), &eligible);
        assert_ne!(a[0].1, b[0].1);
    }
}
