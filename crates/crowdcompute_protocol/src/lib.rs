//! Wire protocol for the foreman's client and worker connections.
//!
//! Covers §4.1 (codec) and §6 (external interfaces) of the foreman design:
//! the JSON envelope, the recognized message types and their payload
//! shapes, length-prefixed framing over an async duplex stream, and the
//! startup configuration object.

pub mod config;
pub mod defaults;
pub mod error;
pub mod framing;
pub mod types;

pub use config::{ForemanConfig, SchedulerKind};
pub use error::{ProtocolError, Result};
pub use framing::{read_envelope, write_envelope, MAX_FRAME_SIZE};
pub use types::{
    message_type, AssignTaskData, Envelope, ErrorData, ErrorKind, FailureCause, FailureRecord,
    GetJobStatusData, JobAcceptedData, JobErrorData, JobResultData, JobStatus, JobStatusData,
    RegisterWorkerData, SubmitJobData, TaskCheckpointData, TaskErrorData, TaskResultData,
    TaskStatus, WorkerAvailability, WorkerSpecs,
};
