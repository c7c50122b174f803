//! CrowdCompute foreman binary.
//!
//! Usage:
//!     crowdcompute-foreman --bind 0.0.0.0:9000 --database sqlite://crowdcompute.db

use clap::Parser;
use crowdcompute_foreman::{Foreman, ForemanConfig};
use crowdcompute_logging::LogConfig;
use crowdcompute_protocol::SchedulerKind;

#[derive(Parser, Debug)]
#[command(name = "crowdcompute-foreman", about = "CrowdCompute job/task/worker coordinator")]
struct Args {
    /// Address workers and clients connect to.
    #[arg(long)]
    bind: Option<String>,

    /// Reserved for the out-of-process monitoring surface (§1, §6);
    /// accepted here so a config file can carry it even though nothing
    /// listens on it yet.
    #[arg(long)]
    admin: Option<String>,

    /// Store connection string, e.g. `sqlite://crowdcompute.db`.
    #[arg(long)]
    database: Option<String>,

    /// Scheduler strategy: fifo | round_robin | least_loaded | performance | priority | pso.
    #[arg(long)]
    scheduler: Option<String>,

    #[arg(long)]
    max_concurrent_tasks_per_worker: Option<u32>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    heartbeat_timeout_secs: Option<u64>,

    #[arg(long)]
    task_stale_after_secs: Option<u64>,

    #[arg(long)]
    supervisor_interval_ms: Option<u64>,

    #[arg(long)]
    send_timeout_secs: Option<u64>,

    #[arg(long)]
    dispatch_tick_ms: Option<u64>,

    #[arg(long)]
    shutdown_drain_secs: Option<u64>,

    /// Emit logs to stderr as well as the rolling file (passed through
    /// to `crowdcompute_logging::init_logging`).
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ForemanConfig> {
        let mut config = ForemanConfig::default();
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(admin) = self.admin {
            config.admin_addr = admin;
        }
        if let Some(database) = self.database {
            config.database_url = database;
        }
        if let Some(scheduler) = self.scheduler {
            config.scheduler = SchedulerKind::parse(&scheduler)
                .ok_or_else(|| anyhow::anyhow!("unknown scheduler strategy: {scheduler}"))?;
        }
        if let Some(v) = self.max_concurrent_tasks_per_worker {
            config.max_concurrent_tasks_per_worker = v;
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.heartbeat_timeout_secs {
            config.heartbeat_timeout_secs = v;
        }
        if let Some(v) = self.task_stale_after_secs {
            config.task_stale_after_secs = v;
        }
        if let Some(v) = self.supervisor_interval_ms {
            config.supervisor_interval_ms = v;
        }
        if let Some(v) = self.send_timeout_secs {
            config.send_timeout_secs = v;
        }
        if let Some(v) = self.dispatch_tick_ms {
            config.dispatch_tick_ms = v;
        }
        if let Some(v) = self.shutdown_drain_secs {
            config.shutdown_drain_secs = v;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let verbose = args.verbose;

    crowdcompute_logging::init_logging(LogConfig {
        app_name: "crowdcompute-foreman",
        verbose,
        tui_mode: false,
    })?;

    let config = args.into_config()?;
    tracing::info!(bind = %config.bind_addr, database = %config.database_url, scheduler = config.scheduler.as_str(), "starting crowdcompute-foreman");

    let foreman = Foreman::bind(config).await?;
    foreman.run().await?;

    Ok(())
}
