//! Connection registry (§4.3): tracks open duplex connections by role,
//! the worker records bound to them, and per-connection outbound
//! serialization.

use crowdcompute_ids::{ConnectionId, JobId, WorkerId};
use crowdcompute_protocol::{Envelope, WorkerAvailability, WorkerSpecs};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::state::WorkerRecord;

/// The role a connection has taken on, bound by its first `register_worker`
/// or `submit_job` (§3 Connection lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnRole {
    Unknown,
    Client,
    Worker,
}

pub struct ConnectionEntry {
    pub role: ConnRole,
    pub worker_id: Option<WorkerId>,
    pub job_id: Option<JobId>,
    tx: mpsc::UnboundedSender<Envelope>,
    /// Signals the connection's read loop to stop. Used when a
    /// `duplicate_worker_id` registration forces the older connection
    /// closed out from under its own reader task (§7).
    cancel: Arc<Notify>,
}

/// Tracks connections, worker records, and the weak bidirectional index
/// between them (§3 Ownership). This is the "registry lock" of §5 — one
/// `Registry` instance lives behind a single `tokio::sync::Mutex`, so
/// holding that mutex serializes all worker-state transitions.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    workers: HashMap<WorkerId, WorkerRecord>,
    worker_conn: HashMap<WorkerId, ConnectionId>,
    job_conn: HashMap<JobId, ConnectionId>,
}

impl Registry {
    /// Register a freshly-accepted connection before its role is known.
    /// The caller keeps the receiver end and spawns the writer task that
    /// drains it — that task is what makes sends on one connection
    /// serialize on the wire, never interleaving frames.
    pub fn open(&mut self, conn_id: ConnectionId, tx: mpsc::UnboundedSender<Envelope>, cancel: Arc<Notify>) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                role: ConnRole::Unknown,
                worker_id: None,
                job_id: None,
                tx,
                cancel,
            },
        );
    }

    /// Bind a worker id to a connection. If `worker_id` was already bound
    /// to a different connection, that older connection is returned so
    /// the caller can close it (§7 `duplicate_worker_id`).
    ///
    /// A worker id already known to this registry keeps its rolling
    /// stats (reliability, completions, failures) — only its connection,
    /// specs, and availability are refreshed. This is what §8 means by
    /// "replaying `register_worker` ... preserves the worker's
    /// persistent stats".
    pub fn register_worker(
        &mut self,
        conn_id: ConnectionId,
        worker_id: WorkerId,
        specs: WorkerSpecs,
    ) -> Option<ConnectionId> {
        let previous = self.worker_conn.insert(worker_id.clone(), conn_id);

        self.workers
            .entry(worker_id.clone())
            .and_modify(|w| {
                w.connection_id = Some(conn_id);
                w.availability = WorkerAvailability::Idle;
                w.specs = specs.clone();
            })
            .or_insert_with(|| WorkerRecord::new(worker_id.clone(), conn_id, specs));

        if let Some(entry) = self.connections.get_mut(&conn_id) {
            entry.role = ConnRole::Worker;
            entry.worker_id = Some(worker_id);
        }
        previous.filter(|prev| *prev != conn_id)
    }

    pub fn register_client(&mut self, conn_id: ConnectionId, job_id: JobId) {
        self.job_conn.insert(job_id.clone(), conn_id);
        if let Some(entry) = self.connections.get_mut(&conn_id) {
            entry.role = ConnRole::Client;
            entry.job_id = Some(job_id);
        }
    }

    pub fn worker(&self, worker_id: &WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    pub fn worker_mut(&mut self, worker_id: &WorkerId) -> Option<&mut WorkerRecord> {
        self.workers.get_mut(worker_id)
    }

    pub fn idle_workers(&self) -> Vec<WorkerRecord> {
        self.workers
            .values()
            .filter(|w| w.availability == crowdcompute_protocol::WorkerAvailability::Idle)
            .cloned()
            .collect()
    }

    pub fn all_workers(&self) -> Vec<WorkerRecord> {
        self.workers.values().cloned().collect()
    }

    pub fn worker_connection(&self, worker_id: &WorkerId) -> Option<ConnectionId> {
        self.worker_conn.get(worker_id).copied()
    }

    pub fn client_connection(&self, job_id: &JobId) -> Option<ConnectionId> {
        self.job_conn.get(job_id).copied()
    }

    /// Drop the job→connection binding without touching the connection
    /// itself (§4.8: "release the job's client-connection binding" at
    /// terminal, independent of whether the client is still connected).
    pub fn release_job_client(&mut self, job_id: &JobId) {
        if let Some(conn_id) = self.job_conn.remove(job_id) {
            if let Some(entry) = self.connections.get_mut(&conn_id) {
                if entry.job_id.as_ref() == Some(job_id) {
                    entry.job_id = None;
                }
            }
        }
    }

    /// Queue `envelope` on `conn_id`'s outbound channel. Returns an error
    /// if the connection is gone — callers treat that as a send failure
    /// (§4.6 step 4).
    pub fn send(&self, conn_id: ConnectionId, envelope: Envelope) -> Result<(), SendError> {
        self.connections
            .get(&conn_id)
            .ok_or(SendError::ConnectionGone)?
            .tx
            .send(envelope)
            .map_err(|_| SendError::ConnectionGone)
    }

    pub fn send_to_worker(&self, worker_id: &WorkerId, envelope: Envelope) -> Result<(), SendError> {
        let conn_id = self
            .worker_connection(worker_id)
            .ok_or(SendError::ConnectionGone)?;
        self.send(conn_id, envelope)
    }

    pub fn send_to_job_client(&self, job_id: &JobId, envelope: Envelope) -> Result<(), SendError> {
        let Some(conn_id) = self.client_connection(job_id) else {
            return Ok(());
        };
        self.send(conn_id, envelope)
    }

    /// Close `conn_id`: drop its entry and, if a worker was bound to it,
    /// return that worker's id so the caller can transition it to `gone`
    /// and requeue its current task under the job lock (§4.3).
    pub fn close(&mut self, conn_id: ConnectionId) -> Option<WorkerId> {
        let entry = self.connections.remove(&conn_id)?;
        entry.cancel.notify_one();
        if let Some(job_id) = &entry.job_id {
            self.job_conn.remove(job_id);
        }
        if let Some(worker_id) = &entry.worker_id {
            // Only drop the worker→connection mapping if it still points
            // at this connection — a `duplicate_worker_id` re-registration
            // may already have rebound it.
            if self.worker_conn.get(worker_id) == Some(&conn_id) {
                self.worker_conn.remove(worker_id);
            }
        }
        entry.worker_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection no longer registered")]
    ConnectionGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_duplicate_worker_id_returns_prior_connection() {
        let mut registry = Registry::default();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let conn1 = ConnectionId::new();
        let conn2 = ConnectionId::new();
        registry.open(conn1, tx1, Arc::new(Notify::new()));
        registry.open(conn2, tx2, Arc::new(Notify::new()));

        let worker = WorkerId::new("w1");
        assert_eq!(registry.register_worker(conn1, worker.clone(), WorkerSpecs::default()), None);

        let prior = registry.register_worker(conn2, worker.clone(), WorkerSpecs::default());
        assert_eq!(prior, Some(conn1));
        assert_eq!(registry.worker_connection(&worker), Some(conn2));
    }

    #[test]
    fn re_registration_preserves_rolling_stats() {
        let mut registry = Registry::default();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let conn1 = ConnectionId::new();
        let conn2 = ConnectionId::new();
        registry.open(conn1, tx1, Arc::new(Notify::new()));
        registry.open(conn2, tx2, Arc::new(Notify::new()));

        let worker = WorkerId::new("w1");
        registry.register_worker(conn1, worker.clone(), WorkerSpecs::default());
        registry.worker_mut(&worker).unwrap().record_completion(1.5);
        registry.worker_mut(&worker).unwrap().record_failure();

        registry.register_worker(conn2, worker.clone(), WorkerSpecs::default());
        let record = registry.worker(&worker).unwrap();
        assert_eq!(record.tasks_completed, 1);
        assert_eq!(record.tasks_failed, 1);
        assert_eq!(record.connection_id, Some(conn2));
    }

    #[test]
    fn close_returns_bound_worker_id() {
        let mut registry = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        registry.open(conn, tx, Arc::new(Notify::new()));
        let worker = WorkerId::new("w1");
        registry.register_worker(conn, worker.clone(), WorkerSpecs::default());

        let closed_worker = registry.close(conn);
        assert_eq!(closed_worker, Some(worker));
    }

    #[tokio::test]
    async fn close_wakes_the_connection_cancel_token() {
        let mut registry = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        let cancel = Arc::new(Notify::new());
        registry.open(conn, tx, cancel.clone());

        registry.close(conn);
        // Does not hang: `close` notified the token before dropping the entry.
        cancel.notified().await;
    }
}
