//! Shared identifier types for CrowdCompute.
//!
//! Jobs and workers are identified by opaque, client-supplied strings (or
//! coordinator-minted UUIDs when the client doesn't provide one). Tasks are
//! identified by `(job_id, index)` — the index doubles as the task's
//! insertion order, which is what drives result ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier. Client-supplied, or minted by the foreman if the
/// client omits one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifies a task within a job: `(job_id, index)`. `index` is the
/// position of the task's argument tuple in the submission and is stable
/// for the lifetime of the job — it is what drives result ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub job_id: JobId,
    pub index: u32,
}

impl TaskId {
    pub fn new(job_id: JobId, index: u32) -> Self {
        Self { job_id, index }
    }

    /// Parse the `{job_id}#{index}` form produced by `Display`. Used to
    /// recover a `TaskId` from the `task_id` string a worker echoes back
    /// in `task_result`/`task_error`/`task_checkpoint` payloads.
    pub fn parse(s: &str) -> Option<Self> {
        let (job_id, index) = s.rsplit_once('#')?;
        Some(Self {
            job_id: JobId::new(job_id),
            index: index.parse().ok()?,
        })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job_id, self.index)
    }
}

/// Opaque worker identifier, supplied by the worker at registration time.
/// Unique per connection; re-registering with a known id closes the older
/// connection (see `register_worker`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Ephemeral connection identifier. Never persisted; scoped to the
/// lifetime of a single TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrips_through_json() {
        let id = JobId::new("j1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"j1\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn task_id_display_includes_index() {
        let id = TaskId::new(JobId::new("j1"), 3);
        assert_eq!(id.to_string(), "j1#3");
    }

    #[test]
    fn task_id_parse_roundtrips_display() {
        let id = TaskId::new(JobId::new("j1"), 3);
        assert_eq!(TaskId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn task_id_parse_rejects_garbage() {
        assert_eq!(TaskId::parse("no-hash-here"), None);
        assert_eq!(TaskId::parse("job#notanumber"), None);
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
