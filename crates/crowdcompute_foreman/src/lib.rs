//! Foreman core (§4): the coordinator that accepts client submissions,
//! dispatches tasks to workers, tracks their state machines, and
//! aggregates ordered results.
//!
//! [`Foreman::bind`] opens the listening socket and connects to the
//! store; [`Foreman::run`] accepts connections and drives them to
//! completion alongside the background dispatcher and supervisor loops
//! until the process is asked to shut down.

pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod job_manager;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod supervisor;
pub mod transitions;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

pub use crowdcompute_protocol::ForemanConfig;
pub use error::{ForemanError, Result};
pub use state::Coordinator;

/// A bound, not-yet-running foreman: the TCP listener is open and the
/// store connection is live, but no connections have been accepted yet.
pub struct Foreman {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
}

impl Foreman {
    /// Connect to the store and bind `config.bind_addr` (§6).
    pub async fn bind(config: ForemanConfig) -> Result<Self> {
        let db = crowdcompute_db::CrowdComputeDb::connect(&config.database_url).await?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(addr = %config.bind_addr, "foreman listening");
        let coordinator = Coordinator::new(config, db);
        Ok(Self { listener, coordinator })
    }

    /// Build a foreman around an already-constructed [`Coordinator`],
    /// for callers (tests, embedding binaries) that want to configure
    /// the store or scheduler themselves before the accept loop starts.
    pub fn from_coordinator(listener: TcpListener, coordinator: Arc<Coordinator>) -> Self {
        Self { listener, coordinator }
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections and run the dispatcher and supervisor loops
    /// until a shutdown signal arrives (SIGINT/SIGTERM, or the ctrl_c
    /// future on platforms without `signal`).
    ///
    /// Per §5's shutdown note: this stops accepting new connections
    /// first, lets in-flight handlers drain up to `shutdown_drain`, then
    /// force-closes whatever is left and marks every still-live job
    /// `cancelled` in the store.
    pub async fn run(self) -> Result<()> {
        let coordinator = self.coordinator;
        let dispatcher_handle = dispatcher::spawn(coordinator.clone());
        let supervisor_handle = supervisor::spawn(coordinator.clone());

        let mut connections = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let coordinator = coordinator.clone();
                            connections.spawn(async move {
                                router::handle_connection(coordinator, stream).await;
                            });
                            tracing::debug!(%peer, "accepted connection");
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                // Reap finished handlers as we go so the JoinSet doesn't
                // grow unbounded across a long-lived process.
                Some(_) = connections.join_next() => {}
            }
        }

        dispatcher_handle.abort();
        supervisor_handle.abort();

        let drain_bound = tokio::time::sleep(coordinator.config.shutdown_drain());
        tokio::pin!(drain_bound);
        loop {
            tokio::select! {
                _ = &mut drain_bound => {
                    info!(remaining = connections.len(), "shutdown drain bound elapsed, force-closing remaining connections");
                    connections.shutdown().await;
                    break;
                }
                next = connections.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }

        cancel_remaining_jobs(&coordinator).await;

        Ok(())
    }
}

/// §5: any job still live (not yet terminal) when the process stops
/// accepting work is persisted as `cancelled` rather than left dangling
/// in whatever state the last handler left it in.
async fn cancel_remaining_jobs(coordinator: &Arc<Coordinator>) {
    for job_id in coordinator.job_ids().await {
        if let Err(e) = coordinator
            .db
            .update_job_status(job_id.as_str(), crowdcompute_protocol::JobStatus::Cancelled, None)
            .await
        {
            error!(error = %e, job_id = %job_id, "failed to persist cancelled status at shutdown");
        }
        coordinator.evict_job(&job_id).await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
