//! Canonical default values shared across the foreman and its collaborators.

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";
pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DB_URL: &str = "sqlite://crowdcompute.db";

pub const DEFAULT_MAX_CONCURRENT_TASKS_PER_WORKER: u32 = 1;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TASK_STALE_MULTIPLIER: u64 = 5;
pub const DEFAULT_SUPERVISOR_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DISPATCH_TICK_MS: u64 = 250;

/// How long graceful shutdown waits for in-flight connection handlers to
/// drain on their own before force-closing what's left (§5 Shutdown).
pub const DEFAULT_SHUTDOWN_DRAIN_SECS: u64 = 5;

pub const DEFAULT_SCHEDULER: &str = "fifo";

/// PSO only engages once both sides of the assignment matrix clear this size.
pub const PSO_MIN_TASKS: usize = 3;
pub const PSO_MIN_WORKERS: usize = 2;
