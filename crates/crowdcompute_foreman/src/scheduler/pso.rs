use crowdcompute_ids::{TaskId, WorkerId};
use crowdcompute_protocol::{defaults, SchedulerKind};
use rand::Rng;

use super::{least_loaded::LeastLoadedScheduler, PendingTaskView, Scheduler};
use crate::state::WorkerRecord;

const SWARM_SIZE: usize = 12;
const MAX_ITERATIONS: usize = 30;
const INERTIA: f64 = 0.6;
const COGNITIVE: f64 = 1.4;
const SOCIAL: f64 = 1.4;

/// Objective weights from §4.4: energy, makespan, load variance, priority
/// satisfaction, deadline penalty.
const W_ENERGY: f64 = 0.30;
const W_MAKESPAN: f64 = 0.25;
const W_LOAD_VARIANCE: f64 = 0.20;
const W_PRIORITY: f64 = 0.15;
const W_DEADLINE: f64 = 0.10;

/// Particle-swarm assignment search over the full `(tasks x workers)`
/// matrix (§4.4). Falls back to least-loaded below the size thresholds
/// so small jobs never pay the swarm's iteration cost. PSO weights and
/// stagnation criteria are suggestive (§9 Open Questions) — this is not
/// a reproduction of any specific reference heuristic.
#[derive(Default)]
pub struct PsoScheduler;

/// One particle: `position[i]` is the index into `workers` assigned to
/// `pending[i]`; `velocity[i]` is a continuous value discretized via
/// rounding, the standard encoding for PSO over discrete assignment
/// problems.
struct Particle {
    position: Vec<usize>,
    velocity: Vec<f64>,
    best_position: Vec<usize>,
    best_fitness: f64,
}

/// The swarm search itself: a free function (no `&self`) so it can be
/// handed to [`tokio::task::spawn_blocking`] and run on a blocking-pool
/// thread, off the dispatcher's critical section and off the scheduler
/// mutex, per §4.4/§5.
fn run_pso(pending: &[PendingTaskView], workers: &[WorkerRecord]) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    let n_tasks = pending.len();
    let n_workers = workers.len();

    let random_position = |rng: &mut rand::rngs::ThreadRng| {
        (0..n_tasks).map(|_| rng.gen_range(0..n_workers)).collect::<Vec<usize>>()
    };

    let mut particles: Vec<Particle> = (0..SWARM_SIZE)
        .map(|_| {
            let position = random_position(&mut rng);
            let fitness = fitness(pending, workers, &position);
            Particle {
                velocity: vec![0.0; n_tasks],
                best_position: position.clone(),
                best_fitness: fitness,
                position,
            }
        })
        .collect();

    let mut global_best = particles
        .iter()
        .min_by(|a, b| a.best_fitness.partial_cmp(&b.best_fitness).unwrap())
        .map(|p| p.best_position.clone())
        .unwrap_or_default();
    let mut global_best_fitness = fitness(pending, workers, &global_best);

    for _ in 0..MAX_ITERATIONS {
        for particle in particles.iter_mut() {
            for i in 0..n_tasks {
                let r1: f64 = rng.gen_range(0.0..1.0);
                let r2: f64 = rng.gen_range(0.0..1.0);
                let cognitive = COGNITIVE * r1 * (particle.best_position[i] as f64 - particle.position[i] as f64);
                let social = SOCIAL * r2 * (global_best[i] as f64 - particle.position[i] as f64);
                particle.velocity[i] = INERTIA * particle.velocity[i] + cognitive + social;

                let next = particle.position[i] as f64 + particle.velocity[i];
                particle.position[i] = (next.round() as i64).rem_euclid(n_workers as i64) as usize;
            }

            let fitness_value = fitness(pending, workers, &particle.position);
            if fitness_value < particle.best_fitness {
                particle.best_fitness = fitness_value;
                particle.best_position = particle.position.clone();
            }
            if fitness_value < global_best_fitness {
                global_best_fitness = fitness_value;
                global_best = particle.position.clone();
            }
        }
    }

    global_best
}

/// Entry point usable both by [`PsoScheduler::select`] (for direct,
/// in-process callers such as tests) and by the dispatcher, which calls
/// this from inside `spawn_blocking` to keep the swarm off the scheduler
/// mutex and off the message-handling path (§4.4, §5).
pub(crate) fn compute_pairs(
    pending: &[PendingTaskView],
    eligible: &[WorkerRecord],
) -> Vec<(TaskId, WorkerId)> {
    if pending.len() < defaults::PSO_MIN_TASKS || eligible.len() < defaults::PSO_MIN_WORKERS {
        return LeastLoadedScheduler.select(pending, eligible);
    }

    let assignment = run_pso(pending, eligible);

    // PSO may assign several tasks to the same worker; keep only the
    // first per worker so the result respects "disjoint workers"
    // (§4.4) and let the next dispatcher tick pick up the rest.
    let mut used_workers = std::collections::HashSet::new();
    pending
        .iter()
        .zip(assignment.iter())
        .filter_map(|(task, &worker_idx)| {
            let worker = &eligible[worker_idx];
            if used_workers.insert(worker.id.clone()) {
                Some((task.task_id.clone(), worker.id.clone()))
            } else {
                None
            }
        })
        .collect()
}

/// Lower is better. Combines §4.4's five terms, each normalized to
/// roughly comparable magnitude.
fn fitness(pending: &[PendingTaskView], workers: &[WorkerRecord], position: &[usize]) -> f64 {
    let n_workers = workers.len();
    let mut load = vec![0u32; n_workers];
    let mut exec_time = vec![0.0f64; n_workers];
    let mut energy = 0.0;
    let mut priority_penalty = 0.0;

    for (task, &worker_idx) in pending.iter().zip(position.iter()) {
        let worker = &workers[worker_idx];
        load[worker_idx] += 1;
        let cost = 1.0 / (1.0 + worker.reliability_score);
        exec_time[worker_idx] += worker.recent_avg_exec_time().max(0.01);
        energy += cost;

        // A high-priority task (low number) landing on a low-reliability
        // worker is penalized; untagged priority is neutral.
        if let Some(priority) = task.priority {
            let urgency = 1.0 / priority.max(1) as f64;
            priority_penalty += urgency * (1.0 - worker.reliability_score);
        }
    }

    let makespan = exec_time.iter().cloned().fold(0.0, f64::max);
    let mean_load = load.iter().sum::<u32>() as f64 / n_workers.max(1) as f64;
    let load_variance = load
        .iter()
        .map(|&l| (l as f64 - mean_load).powi(2))
        .sum::<f64>()
        / n_workers.max(1) as f64;

    // No per-task deadlines are modeled at this layer (job-level deadlines
    // are enforced by the supervisor), so this term stays at zero unless a
    // future extension threads deadlines through `PendingTaskView`.
    let deadline_penalty = 0.0;

    W_ENERGY * energy
        + W_MAKESPAN * makespan
        + W_LOAD_VARIANCE * load_variance
        + W_PRIORITY * priority_penalty
        + W_DEADLINE * deadline_penalty
}

impl Scheduler for PsoScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Pso
    }

    fn select(
        &mut self,
        pending: &[PendingTaskView],
        eligible: &[WorkerRecord],
    ) -> Vec<(TaskId, WorkerId)> {
        compute_pairs(pending, eligible)
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
    fn falls_back_to_least_loaded_below_thresholds() {
        let job = JobId::new("j1");
        let pending = vec![PendingTaskView { task_id: TaskId::new(job, 0), priority: None }];
        let eligible = vec![worker("w1")];

        let mut scheduler = PsoScheduler::default();
        let pairs = scheduler.select(&pending, &eligible);
        assert_eq!(pairs, vec![(TaskId::new(JobId::new("j1"), 0), WorkerId::new("w1"))]);
    }

    #[test]
    fn produces_disjoint_worker_assignments_above_thresholds() {
        let job = JobId::new("j1");
        let pending: Vec<_> = (0..4)
            .map(|i| PendingTaskView { task_id: TaskId::new(job.clone(), i), priority: None })
            .collect();
        let eligible = vec![worker("w1"), worker("w2"), worker("w3")];

        let mut scheduler = PsoScheduler::default();
        let pairs = scheduler.select(&pending, &eligible);

        let mut seen = std::collections::HashSet::new();
        for (_, worker_id) in &pairs {
            assert!(seen.insert(worker_id.clone()), "worker assigned twice in one call");
        }
        assert!(pairs.len() <= eligible.len());
    }
}
