//! Reference worker: a minimal implementation of the protocol the
//! foreman expects a worker to speak (§1 treats the real worker
//! executable as an external collaborator specified only by this wire
//! contract). Used as the test harness that drives the foreman's
//! integration tests end to end, and buildable as a standalone binary
//! for manual exercising of a running foreman.

pub mod functions;
pub mod worker;

pub use worker::{Worker, WorkerConfig};
