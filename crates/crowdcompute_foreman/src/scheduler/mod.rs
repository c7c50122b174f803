//! Scheduler interface and strategies (§4.4).
//!
//! A scheduler is a (mostly) pure function over the pending-task
//! snapshot and the eligible-worker snapshot that returns zero or more
//! `(task, worker)` pairs, each covering disjoint tasks and disjoint
//! workers within one call. Its selection is non-authoritative — the
//! dispatcher re-checks status under the job+registry locks before
//! committing (§4.6).
//!
//! Strategies are tagged variants behind one narrow trait rather than
//! open-ended dynamic dispatch (§9 Design Notes).

mod fifo;
mod least_loaded;
mod performance;
mod priority;
pub(crate) mod pso;
mod round_robin;

use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::{FailureCause, SchedulerKind};

use crate::state::WorkerRecord;

/// A pending task as seen by a scheduler: stripped of everything but
/// what scheduling decisions need.
#[derive(Debug, Clone)]
pub struct PendingTaskView {
    pub task_id: TaskId,
    pub priority: Option<i32>,
}

/// The narrow capability set every strategy implements (§9).
pub trait Scheduler: Send + Sync {
    fn kind(&self) -> SchedulerKind;

    /// Pick disjoint `(task, worker)` pairs. `pending` is already in
    /// insertion order; `eligible` holds only `idle` workers.
    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)>;

    /// Notified after a task assigned by this scheduler fails, so
    /// stateful strategies (performance) can adjust their bookkeeping.
    fn on_failure(&mut self, _worker_id: &WorkerId, _task_id: &TaskId, _cause: FailureCause) {}
}

pub fn new_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Fifo => Box::new(fifo::FifoScheduler),
        SchedulerKind::RoundRobin => Box::new(round_robin::RoundRobinScheduler::default()),
        SchedulerKind::LeastLoaded => Box::new(least_loaded::LeastLoadedScheduler),
        SchedulerKind::Performance => Box::new(performance::PerformanceScheduler::default()),
        SchedulerKind::Priority => Box::new(priority::PriorityScheduler),
        SchedulerKind::Pso => Box::new(pso::PsoScheduler::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_constructs_a_scheduler_reporting_its_own_kind() {
        for kind in [
            SchedulerKind::Fifo,
            SchedulerKind::RoundRobin,
            SchedulerKind::LeastLoaded,
            SchedulerKind::Performance,
            SchedulerKind::Priority,
            SchedulerKind::Pso,
        ] {
            let s = new_scheduler(kind);
            assert_eq!(s.kind(), kind);
        }
    }
}
