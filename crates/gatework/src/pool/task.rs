//! Shared-memory worker pool.
//!
//! A fixed set of worker tasks drains an internal [`TrackedQueue`] of jobs.
//! Each job is a blocking closure and runs on tokio's blocking thread pool,
//! so CPU-bound work never stalls the async runtime. A panicking job takes
//! down neither its worker nor the pool; it surfaces as
//! [`JobError::Panicked`] on the handle.

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::pool::{JobError, WorkerPool};
use crate::queue::TrackedQueue;

/// A unit of blocking work: runs to success with a `T` or failure with a
/// message.
pub type BlockingJob<T> = Box<dyn FnOnce() -> Result<T, String> + Send + 'static>;

type Envelope<T> = (BlockingJob<T>, oneshot::Sender<Result<T, JobError>>);

/// Worker pool backed by tasks in the current process.
pub struct TaskPool<T: Send + 'static> {
    queue: TrackedQueue<Envelope<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Start a pool with `workers` worker tasks. Must be called from within
    /// a tokio runtime.
    pub fn new(workers: usize) -> Self {
        assert!(workers >= 1, "a pool needs at least one worker");

        let queue: TrackedQueue<Envelope<T>> = TrackedQueue::new();
        let handles = (0..workers)
            .map(|index| {
                let queue = queue.clone();
                tokio::spawn(worker_loop(index, queue))
            })
            .collect();

        Self {
            queue,
            workers: Mutex::new(handles),
        }
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn backlog(&self) -> i64 {
        self.queue.qsize()
    }
}

async fn worker_loop<T: Send + 'static>(index: usize, queue: TrackedQueue<Envelope<T>>) {
    tracing::debug!(worker = index, "Worker started");

    while let Ok((job, reply)) = queue.get().await {
        let outcome = match tokio::task::spawn_blocking(job).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(JobError::Failed { message }),
            Err(join_err) if join_err.is_panic() => {
                tracing::warn!(worker = index, "Job panicked");
                Err(JobError::Panicked)
            }
            Err(_) => Err(JobError::WorkerLost),
        };
        // The submitter may have dropped its handle; the outcome is
        // simply discarded in that case.
        let _ = reply.send(outcome);
    }

    tracing::debug!(worker = index, "Worker stopped");
}

#[async_trait::async_trait]
impl<T: Send + 'static> WorkerPool for TaskPool<T> {
    type Job = BlockingJob<T>;
    type Output = T;

    async fn dispatch(&self, job: Self::Job) -> Result<T, JobError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .put((job, tx))
            .map_err(|_| JobError::WorkerLost)?;
        rx.await.map_err(|_| JobError::WorkerLost)?
    }

    fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    async fn close(&self) {
        self.queue.close();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            // Workers drain what was already dispatched, then exit.
            let _ = handle.await;
        }
    }
}
