//! Startup configuration object (§6 Configuration).

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler strategy names recognized in configuration and the admin
/// toggle (§4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Fifo,
    RoundRobin,
    LeastLoaded,
    Performance,
    Priority,
    Pso,
}

impl SchedulerKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fifo" => Some(Self::Fifo),
            "round_robin" => Some(Self::RoundRobin),
            "least_loaded" => Some(Self::LeastLoaded),
            "performance" => Some(Self::Performance),
            "priority" => Some(Self::Priority),
            "pso" => Some(Self::Pso),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
            Self::Performance => "performance",
            Self::Priority => "priority",
            Self::Pso => "pso",
        }
    }
}

impl Default for SchedulerKind {
    fn default() -> Self {
        Self::Fifo
    }
}

/// The single startup configuration object described in §6. Every
/// duration field is seconds/milliseconds in the constructor and exposed
/// as a `Duration` for the core to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub bind_addr: String,
    pub admin_addr: String,
    pub database_url: String,
    pub scheduler: SchedulerKind,
    pub max_concurrent_tasks_per_worker: u32,
    pub max_attempts: u32,
    pub heartbeat_timeout_secs: u64,
    pub task_stale_after_secs: u64,
    pub supervisor_interval_ms: u64,
    pub send_timeout_secs: u64,
    pub dispatch_tick_ms: u64,
    pub shutdown_drain_secs: u64,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        let heartbeat_timeout_secs = defaults::DEFAULT_HEARTBEAT_TIMEOUT_SECS;
        Self {
            bind_addr: defaults::DEFAULT_BIND_ADDR.to_string(),
            admin_addr: defaults::DEFAULT_ADMIN_ADDR.to_string(),
            database_url: defaults::DEFAULT_DB_URL.to_string(),
            scheduler: SchedulerKind::default(),
            max_concurrent_tasks_per_worker: defaults::DEFAULT_MAX_CONCURRENT_TASKS_PER_WORKER,
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
            heartbeat_timeout_secs,
            task_stale_after_secs: heartbeat_timeout_secs * defaults::DEFAULT_TASK_STALE_MULTIPLIER,
            supervisor_interval_ms: defaults::DEFAULT_SUPERVISOR_INTERVAL_MS,
            send_timeout_secs: defaults::DEFAULT_SEND_TIMEOUT_SECS,
            dispatch_tick_ms: defaults::DEFAULT_DISPATCH_TICK_MS,
            shutdown_drain_secs: defaults::DEFAULT_SHUTDOWN_DRAIN_SECS,
        }
    }
}

impl ForemanConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn task_stale_after(&self) -> Duration {
        Duration::from_secs(self.task_stale_after_secs)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn dispatch_tick(&self) -> Duration {
        Duration::from_millis(self.dispatch_tick_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_kind_roundtrips_through_strings() {
        for kind in [
            SchedulerKind::Fifo,
            SchedulerKind::RoundRobin,
            SchedulerKind::LeastLoaded,
            SchedulerKind::Performance,
            SchedulerKind::Priority,
            SchedulerKind::Pso,
        ] {
            assert_eq!(SchedulerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SchedulerKind::parse("bogus"), None);
    }

    #[test]
    fn default_task_stale_after_is_five_times_heartbeat_timeout() {
        let cfg = ForemanConfig::default();
        assert_eq!(cfg.task_stale_after_secs, cfg.heartbeat_timeout_secs * 5);
    }
}
