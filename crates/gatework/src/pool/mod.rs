//! Worker-pool backends.
//!
//! `WorkerPool` is the seam between the gated executor and whatever actually
//! runs the work. The executor composes a pool rather than extending one, so
//! gating can wrap any dispatch backend without modifying it. Two backends
//! ship here:
//!
//! - [`TaskPool`] — shared-memory: worker tasks in this process, CPU work on
//!   the blocking thread pool.
//! - [`ProcessPool`] — isolated-memory: one subprocess per slot, coordinated
//!   from this process over per-slot sockets.
//!
//! Both present identical admission-control and size-accounting semantics
//! because the gate and every counter live on the parent side in both cases.

mod task;

#[cfg(unix)]
mod process;

pub use task::{BlockingJob, TaskPool};

#[cfg(unix)]
pub use process::{ProcessPool, ProcessPoolConfig};

/// Terminal failure of one dispatched job.
///
/// None of these crash the pool; they are captured and surfaced only when
/// the caller inspects the job's handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job itself reported an error.
    #[error("job failed: {message}")]
    Failed { message: String },

    /// The job panicked; the worker survived.
    #[error("job panicked")]
    Panicked,

    /// The worker or its transport was lost before a terminal outcome
    /// was observed.
    #[error("worker lost before the job completed")]
    WorkerLost,

    /// Waiting on the job's outcome exceeded its bound.
    #[error("timed out waiting for the job outcome")]
    Timeout,
}

/// A dispatch backend: runs one job to its terminal outcome.
#[async_trait::async_trait]
pub trait WorkerPool: Send + Sync + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    /// Run `job` to completion and return its terminal outcome.
    ///
    /// Implementations must resolve exactly once per job, success or
    /// failure — the executor ties permit release to this resolving.
    async fn dispatch(&self, job: Self::Job) -> Result<Self::Output, JobError>;

    /// Whether the pool has stopped accepting work.
    fn is_closed(&self) -> bool;

    /// Stop accepting work and wind down workers. Jobs already dispatched
    /// run to their terminal outcome.
    async fn close(&self);
}
