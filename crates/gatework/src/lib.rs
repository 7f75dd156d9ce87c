//! gatework: bounded-concurrency task execution.
//!
//! Producers submit opaque units of work to a [`GatedExecutor`]; a
//! [`PermitGate`] admits at most `max_in_flight` of them at a time and a
//! worker-pool backend runs them — in-process tasks ([`TaskPool`]) or
//! subprocess workers ([`ProcessPool`]) with identical semantics. The
//! [`TrackedQueue`] keeps a trustworthy size for flow-control decisions no
//! matter what the underlying transport can report.

pub mod bridge;
mod count;
mod executor;
mod gate;
pub mod pool;
mod queue;
#[cfg(unix)]
pub mod worker;

pub use bridge::protocol::JobId;
pub use count::SharedCount;
pub use executor::{GatedExecutor, JobHandle, SubmitError};
pub use gate::{Permit, PermitGate};
pub use pool::{BlockingJob, JobError, TaskPool, WorkerPool};
#[cfg(unix)]
pub use pool::{ProcessPool, ProcessPoolConfig};
pub use queue::{QueueError, TrackedQueue};
#[cfg(unix)]
pub use worker::{JobRunner, run_worker, serve_slot};
