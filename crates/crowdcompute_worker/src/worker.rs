//! A worker connection: registers with the foreman, then loops
//! executing whatever it is assigned until the connection drops.

use std::time::Duration;

use crowdcompute_ids::WorkerId;
use crowdcompute_protocol::{
    framing, message_type, AssignTaskData, Envelope, RegisterWorkerData, TaskErrorData,
    TaskResultData, WorkerSpecs,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use crate::functions;

/// How often this harness re-announces liveness while idle between
/// assignments (§4.9 relies on this to keep a worker out of `gone`).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub struct WorkerConfig {
    pub foreman_addr: String,
    pub worker_id: WorkerId,
    pub specs: WorkerSpecs,
    /// If set, the worker disconnects the instant it receives its
    /// first `assign_task` instead of executing it — for exercising
    /// the foreman's disconnect-mid-task reassignment path (§8
    /// scenario 3) without a real crash.
    pub drop_after_assign: bool,
}

impl WorkerConfig {
    pub fn new(foreman_addr: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            foreman_addr: foreman_addr.into(),
            worker_id: WorkerId::new(worker_id),
            specs: WorkerSpecs::default(),
            drop_after_assign: false,
        }
    }
}

pub struct Worker {
    config: WorkerConfig,
    stream: TcpStream,
}

impl Worker {
    /// Connect to the foreman and send `register_worker` (§4.2).
    pub async fn connect(config: WorkerConfig) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(&config.foreman_addr).await?;
        info!(addr = %config.foreman_addr, worker_id = %config.worker_id, "connected to foreman");

        let register = Envelope::new(
            message_type::REGISTER_WORKER,
            serde_json::to_value(RegisterWorkerData {
                worker_id: config.worker_id.clone(),
                specs: config.specs.clone(),
            })?,
        );
        framing::write_envelope(&mut stream, &register).await?;

        Ok(Self { config, stream })
    }

    /// Run until the connection closes or a fatal protocol error occurs.
    /// Assignments are executed and replied to inline; a periodic
    /// heartbeat keeps the worker out of the supervisor's timeout sweep
    /// while idle (§4.9).
    pub async fn run(mut self) -> anyhow::Result<()> {
        let (read_half, mut write_half) = self.stream.split();
        let mut read_half = read_half;

        let worker_id = self.config.worker_id.clone();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; already just registered

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let envelope = Envelope::new(message_type::WORKER_HEARTBEAT, serde_json::Value::Null)
                        .with_worker_id(worker_id.clone());
                    if let Err(e) = framing::write_envelope(&mut write_half, &envelope).await {
                        warn!(error = %e, "heartbeat send failed, stopping");
                        return Ok(());
                    }
                }
                received = framing::read_envelope(&mut read_half) => {
                    let envelope = match received {
                        Ok(envelope) => envelope,
                        Err(crowdcompute_protocol::ProtocolError::ConnectionClosed) => {
                            info!("foreman closed connection");
                            return Ok(());
                        }
                        Err(e) => {
                            error!(error = %e, "framing error, stopping");
                            return Err(e.into());
                        }
                    };
                    if self.config.drop_after_assign && envelope.kind == message_type::ASSIGN_TASK {
                        info!("dropping connection instead of executing assigned task");
                        return Ok(());
                    }
                    handle_envelope(&worker_id, envelope, &mut write_half).await?;
                }
            }
        }
    }
}

async fn handle_envelope<W: AsyncWrite + Unpin>(
    worker_id: &WorkerId,
    envelope: Envelope,
    write_half: &mut W,
) -> anyhow::Result<()> {
    match envelope.kind.as_str() {
        message_type::ASSIGN_TASK => {
            let data: AssignTaskData = envelope.decode_data()?;
            let reply = execute_assignment(data).await;
            framing::write_envelope(write_half, &reply).await?;
        }
        message_type::PING => {
            let pong = Envelope::new(message_type::PONG, serde_json::Value::Null)
                .with_worker_id(worker_id.clone());
            framing::write_envelope(write_half, &pong).await?;
        }
        message_type::JOB_RESULT | message_type::JOB_ERROR | message_type::CHECKPOINT_ACK => {
            // Informational traffic this harness doesn't act on.
        }
        other => {
            warn!(kind = other, "worker received unhandled message type");
        }
    }
    Ok(())
}

/// Decode `func_code`, run it, and build the `task_result`/`task_error`
/// envelope to send back (§6 Result payload).
async fn execute_assignment(data: AssignTaskData) -> Envelope {
    match functions::execute(&data.func_code, &data.task_args).await {
        Ok(result) => Envelope::new(
            message_type::TASK_RESULT,
            serde_json::to_value(TaskResultData { task_id: data.task_id, result }).expect("always serializes"),
        ),
        Err(e) => Envelope::new(
            message_type::TASK_ERROR,
            serde_json::to_value(TaskErrorData { task_id: data.task_id, message: e.to_string() })
                .expect("always serializes"),
        ),
    }
}

/// Send `disconnect` and shut the socket down cleanly, for tests that
/// want to exercise the foreman's disconnect-cleanup path deliberately.
pub async fn send_disconnect<W: AsyncWrite + Unpin>(write_half: &mut W) -> anyhow::Result<()> {
    let envelope = Envelope::new(message_type::DISCONNECT, serde_json::Value::Null);
    framing::write_envelope(write_half, &envelope).await?;
    write_half.shutdown().await?;
    Ok(())
}
