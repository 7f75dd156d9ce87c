//! Gated executor — admission-controlled dispatch over a worker pool.
//!
//! `submit` acquires a permit before handing work to the pool, so callers
//! block (are descheduled) once `max_in_flight` items are outstanding. The
//! permit travels into the completion task and is released when that task
//! ends, whatever the outcome — success, job error, even a panic inside the
//! backend — so capacity can neither leak away nor be double-freed.
//!
//! Item lifecycle: submitted → permit-acquired → dispatched →
//! {completed | failed} → permit-released. Terminal states are terminal;
//! resubmission is always a new item.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;

use crate::bridge::protocol::JobId;
use crate::gate::PermitGate;
use crate::pool::{JobError, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The executor (or its pool) has been shut down. No permit was
    /// acquired or held.
    #[error("pool is closed")]
    PoolClosed,
}

/// Handle to observe one submitted job's terminal outcome.
///
/// Dropping the handle discards the outcome but has no effect on the job
/// or its permit.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    rx: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job's terminal outcome.
    pub async fn outcome(self) -> Result<T, JobError> {
        self.rx.await.unwrap_or(Err(JobError::WorkerLost))
    }

    /// Wait for the outcome, giving up after `timeout`. The job itself
    /// keeps running; only the wait is abandoned.
    pub async fn outcome_timeout(self, timeout: Duration) -> Result<T, JobError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(JobError::WorkerLost),
            Err(_) => Err(JobError::Timeout),
        }
    }
}

/// Executor that caps in-flight work with a [`PermitGate`].
///
/// Composes a gate with any [`WorkerPool`] backend; the backend is wrapped,
/// never modified. Cheap to share via `Arc`.
pub struct GatedExecutor<P: WorkerPool> {
    gate: PermitGate,
    pool: Arc<P>,
    tracker: TaskTracker,
}

impl<P: WorkerPool> GatedExecutor<P> {
    /// Wrap `pool` with an admission limit of `max_in_flight` items.
    ///
    /// # Panics
    /// If `max_in_flight` is zero — an executor that can never admit work
    /// is a configuration bug, not a runtime condition.
    pub fn new(max_in_flight: usize, pool: P) -> Self {
        assert!(max_in_flight >= 1, "max_in_flight must be at least 1");
        Self {
            gate: PermitGate::new(max_in_flight),
            pool: Arc::new(pool),
            tracker: TaskTracker::new(),
        }
    }

    /// Submit one job, blocking until a permit is free.
    ///
    /// The returned handle observes the terminal outcome; a failure inside
    /// the job is captured there, never raised here. Exactly one permit is
    /// released per submitted item, as a side effect of the item reaching
    /// its terminal state.
    pub async fn submit(&self, job: P::Job) -> Result<JobHandle<P::Output>, SubmitError> {
        if self.tracker.is_closed() || self.pool.is_closed() {
            return Err(SubmitError::PoolClosed);
        }

        let permit = self.gate.acquire().await;
        let id = JobId::new();
        let (tx, rx) = oneshot::channel();
        let pool = Arc::clone(&self.pool);

        tracing::trace!(job = %id, in_flight = self.gate.held(), "Job admitted");

        self.tracker.spawn(async move {
            let outcome = pool.dispatch(job).await;
            match &outcome {
                Ok(_) => tracing::trace!(job = %id, "Job completed"),
                Err(e) => tracing::debug!(job = %id, error = %e, "Job failed"),
            }
            let _ = tx.send(outcome);
            // Permit drops here — the one and only release for this item.
            drop(permit);
        });

        Ok(JobHandle { id, rx })
    }

    /// Stop accepting submissions. With `wait`, blocks until every
    /// dispatched item has reached a terminal state before closing the
    /// pool; otherwise the pool winds down in the background once in-flight
    /// items finish.
    pub async fn shutdown(&self, wait: bool) {
        self.tracker.close();
        if wait {
            self.tracker.wait().await;
            self.pool.close().await;
        } else {
            let tracker = self.tracker.clone();
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                tracker.wait().await;
                pool.close().await;
            });
        }
        tracing::debug!(waited = wait, "Executor shut down");
    }

    /// Items currently holding a permit.
    pub fn in_flight(&self) -> i64 {
        self.gate.held()
    }

    pub fn max_in_flight(&self) -> usize {
        self.gate.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed() || self.pool.is_closed()
    }
}
