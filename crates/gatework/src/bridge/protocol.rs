//! Wire protocol for parent↔worker slot sockets.
//!
//! One request kind runs a job, one shuts the worker down; responses carry
//! the job's terminal outcome. Every request is answered exactly once, which
//! is what lets the parent tie permit release to a worker's reply.

use serde::{Deserialize, Serialize};

/// Unique identifier for a submitted job.
///
/// UUID v4 avoids confusion with slot indices and prevents accidental reuse
/// across resubmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages from parent to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkRequest {
    /// Run one job to its terminal outcome and reply with it.
    Run {
        id: JobId,
        input: serde_json::Value,
    },

    /// Finish up and exit; no reply expected.
    Shutdown,
}

/// Messages from worker to parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkResponse {
    Done {
        id: JobId,
        output: serde_json::Value,
    },

    Failed {
        id: JobId,
        error: String,
    },
}

impl WorkResponse {
    pub fn id(&self) -> JobId {
        match self {
            Self::Done { id, .. } => *id,
            Self::Failed { id, .. } => *id,
        }
    }
}
