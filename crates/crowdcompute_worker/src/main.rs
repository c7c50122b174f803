//! Reference CrowdCompute worker.
//!
//! Usage:
//!     crowdcompute-worker --connect 127.0.0.1:9000 --worker-id w1

use clap::Parser;
use crowdcompute_worker::{Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "crowdcompute-worker", about = "Reference worker for CrowdCompute")]
struct Args {
    /// Foreman address to connect to.
    #[arg(long, default_value = "127.0.0.1:9000")]
    connect: String,

    /// Worker id to register as (auto-generated if not provided).
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdcompute_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("rust-{}", uuid::Uuid::new_v4().simple()));

    tracing::info!(foreman = %args.connect, worker_id = %worker_id, "starting crowdcompute-worker");

    let config = WorkerConfig::new(args.connect, worker_id);
    let worker = Worker::connect(config).await?;
    worker.run().await?;

    Ok(())
}
