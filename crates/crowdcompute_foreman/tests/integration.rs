//! End-to-end scenarios over real TCP connections, speaking the wire
//! protocol directly on the client side and using the reference worker
//! harness on the other. These follow the walkthroughs in the design's
//! testable-properties section: happy path, retry-to-failure, and a
//! concurrent multi-job submission against a single worker.

use crowdcompute_foreman::{Foreman, ForemanConfig};
use crowdcompute_protocol::{
    framing, message_type, Envelope, JobErrorData, JobResultData, SubmitJobData,
};
use crowdcompute_worker::{Worker, WorkerConfig};
use tokio::net::TcpStream;

async fn spawn_foreman(mut config: ForemanConfig) -> std::net::SocketAddr {
    let dir = tempfile::tempdir().unwrap();
    config.bind_addr = "127.0.0.1:0".to_string();
    config.database_url = format!("sqlite://{}/test.db", dir.path().display());
    // Leak the tempdir so the sqlite file outlives the test; these are
    // short-lived processes and the OS reclaims it on exit.
    std::mem::forget(dir);

    let foreman = Foreman::bind(config).await.unwrap();
    let addr = foreman.local_addr().unwrap();
    tokio::spawn(async move {
        foreman.run().await.unwrap();
    });
    addr
}

async fn connect_and_submit(addr: std::net::SocketAddr, submission: SubmitJobData) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let envelope = Envelope::new(message_type::SUBMIT_JOB, serde_json::to_value(submission).unwrap());
    framing::write_envelope(&mut stream, &envelope).await.unwrap();

    let accepted = framing::read_envelope(&mut stream).await.unwrap();
    assert_eq!(accepted.kind, message_type::JOB_ACCEPTED);
    stream
}

async fn spawn_worker(addr: std::net::SocketAddr, worker_id: &str) {
    let config = WorkerConfig::new(addr.to_string(), worker_id.to_string());
    let worker = Worker::connect(config).await.unwrap();
    tokio::spawn(async move {
        let _ = worker.run().await;
    });
}

async fn spawn_flaky_worker(addr: std::net::SocketAddr, worker_id: &str) {
    let mut config = WorkerConfig::new(addr.to_string(), worker_id.to_string());
    config.drop_after_assign = true;
    let worker = Worker::connect(config).await.unwrap();
    tokio::spawn(async move {
        let _ = worker.run().await;
    });
}

fn hex_func(name: &str) -> String {
    crowdcompute_worker::functions::encode(name)
}

#[tokio::test]
async fn happy_path_square_function_returns_ordered_results() {
    let addr = spawn_foreman(ForemanConfig::default()).await;

    let submission = SubmitJobData {
        func_code: hex_func(crowdcompute_worker::functions::SQUARE),
        args_list: vec![
            serde_json::json!([1]),
            serde_json::json!([2]),
            serde_json::json!([3]),
        ],
        total_tasks: 3,
        checkpoint_interval: None,
        priority: None,
    };
    let mut stream = connect_and_submit(addr, submission).await;
    spawn_worker(addr, "w1").await;

    let result = framing::read_envelope(&mut stream).await.unwrap();
    assert_eq!(result.kind, message_type::JOB_RESULT);
    let data: JobResultData = result.decode_data().unwrap();
    assert_eq!(data.results, vec![serde_json::json!(1.0), serde_json::json!(4.0), serde_json::json!(9.0)]);
}

#[tokio::test]
async fn task_that_always_errors_retries_then_fails_the_job() {
    let mut config = ForemanConfig::default();
    config.max_attempts = 2;
    let addr = spawn_foreman(config).await;

    let submission = SubmitJobData {
        func_code: hex_func(crowdcompute_worker::functions::ALWAYS_FAIL),
        args_list: vec![serde_json::json!([])],
        total_tasks: 1,
        checkpoint_interval: None,
        priority: None,
    };
    let mut stream = connect_and_submit(addr, submission).await;
    spawn_worker(addr, "w1").await;

    let result = framing::read_envelope(&mut stream).await.unwrap();
    assert_eq!(result.kind, message_type::JOB_ERROR);
    let data: JobErrorData = result.decode_data().unwrap();
    assert_eq!(data.errors.len(), 1);
}

#[tokio::test]
async fn concurrent_jobs_against_one_worker_each_complete_in_full() {
    let addr = spawn_foreman(ForemanConfig::default()).await;
    spawn_worker(addr, "w1").await;

    let mut streams = Vec::new();
    for job in 0..3 {
        let submission = SubmitJobData {
            func_code: hex_func(crowdcompute_worker::functions::IDENTITY),
            args_list: vec![serde_json::json!([job])],
            total_tasks: 1,
            checkpoint_interval: None,
            priority: None,
        };
        streams.push(connect_and_submit(addr, submission).await);
    }

    for mut stream in streams {
        let result = framing::read_envelope(&mut stream).await.unwrap();
        assert_eq!(result.kind, message_type::JOB_RESULT);
        let data: JobResultData = result.decode_data().unwrap();
        assert_eq!(data.results.len(), 1);
    }
}

#[tokio::test]
async fn task_survives_a_worker_disconnecting_mid_assignment() {
    let mut config = ForemanConfig::default();
    config.supervisor_interval_ms = 20;
    let addr = spawn_foreman(config).await;

    let submission = SubmitJobData {
        func_code: hex_func(crowdcompute_worker::functions::IDENTITY),
        args_list: vec![serde_json::json!([1])],
        total_tasks: 1,
        checkpoint_interval: None,
        priority: None,
    };
    let mut stream = connect_and_submit(addr, submission).await;

    // The first worker picks up the lone task and vanishes without
    // replying; the task must be requeued and handed to the second,
    // well-behaved worker rather than the job hanging forever.
    spawn_flaky_worker(addr, "flaky").await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    spawn_worker(addr, "reliable").await;

    let result = framing::read_envelope(&mut stream).await.unwrap();
    assert_eq!(result.kind, message_type::JOB_RESULT);
    let data: JobResultData = result.decode_data().unwrap();
    assert_eq!(data.results, vec![serde_json::json!([1])]);
}
