//! Isolated-memory worker pool.
//!
//! One subprocess per slot, each reached over its own Unix socket with
//! length-prefixed JSON frames. Idle slots sit in a channel and dispatch
//! takes the next free one, so the pool doubles as its own queue of
//! capacity `workers`. The gate and every counter stay on this (parent)
//! side of the sockets; worker processes share no memory with us and none
//! is assumed.
//!
//! A slot whose socket errors or hits EOF mid-job is dropped rather than
//! returned: the job surfaces as `WorkerLost` and the pool's capacity
//! shrinks by one, logged at `warn` since it is a permanent reduction.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{JobId, WorkRequest, WorkResponse};
use crate::count::SharedCount;
use crate::pool::{JobError, WorkerPool};

/// How to launch worker processes.
///
/// Each worker is invoked as `program [args...] <socket-path>` and is
/// expected to connect to the socket and speak the slot protocol (see
/// [`run_worker`](crate::worker::run_worker)).
#[derive(Debug, Clone)]
pub struct ProcessPoolConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workers: usize,
}

impl ProcessPoolConfig {
    pub fn new(program: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workers,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

struct Slot {
    index: usize,
    writer: FramedWrite<OwnedWriteHalf, JsonCodec<WorkRequest>>,
    reader: FramedRead<OwnedReadHalf, JsonCodec<WorkResponse>>,
}

impl Slot {
    fn from_stream(index: usize, stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            index,
            writer: FramedWrite::new(write, JsonCodec::new()),
            reader: FramedRead::new(read, JsonCodec::new()),
        }
    }

    /// Send one job and read frames until its terminal outcome arrives.
    async fn run(&mut self, id: JobId, input: serde_json::Value) -> Result<serde_json::Value, JobError> {
        self.writer
            .send(WorkRequest::Run { id, input })
            .await
            .map_err(|_| JobError::WorkerLost)?;

        while let Some(frame) = self.reader.next().await {
            let response = frame.map_err(|_| JobError::WorkerLost)?;
            if response.id() != id {
                tracing::warn!(
                    slot = self.index,
                    expected = %id,
                    got = %response.id(),
                    "Discarding response for a different job"
                );
                continue;
            }
            return match response {
                WorkResponse::Done { output, .. } => Ok(output),
                WorkResponse::Failed { error, .. } => Err(JobError::Failed { message: error }),
            };
        }

        // EOF before a terminal outcome: the worker died mid-job.
        Err(JobError::WorkerLost)
    }

    async fn send_shutdown(&mut self) {
        if self.writer.send(WorkRequest::Shutdown).await.is_err() {
            tracing::debug!(slot = self.index, "Worker already gone at shutdown");
        }
    }
}

/// Worker pool backed by subprocesses.
pub struct ProcessPool {
    slot_tx: mpsc::Sender<Slot>,
    slot_rx: Mutex<mpsc::Receiver<Slot>>,
    capacity: usize,
    live: SharedCount,
    closed: AtomicBool,
    children: Mutex<Vec<Child>>,
    socket_dir: Option<PathBuf>,
}

impl ProcessPool {
    /// Launch `config.workers` worker processes and wait for each to
    /// connect to its slot socket.
    pub async fn spawn(config: ProcessPoolConfig) -> io::Result<Self> {
        assert!(config.workers >= 1, "a pool needs at least one worker");

        let dir = std::env::temp_dir().join(format!(
            "gatework-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), workers = config.workers, "Creating slot sockets");

        let mut listeners = Vec::with_capacity(config.workers);
        let mut children = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let path = dir.join(format!("slot-{i}.sock"));
            listeners.push(UnixListener::bind(&path)?);

            let child = Command::new(&config.program)
                .args(&config.args)
                .arg(&path)
                .kill_on_drop(true)
                .spawn()?;
            tracing::debug!(slot = i, pid = child.id(), "Worker launched");
            children.push(child);
        }

        let mut streams = Vec::with_capacity(config.workers);
        for (i, listener) in listeners.iter().enumerate() {
            let (stream, _) = listener.accept().await?;
            tracing::trace!(slot = i, "Worker connected");
            streams.push(stream);
        }

        let mut pool = Self::from_streams(streams);
        pool.children = Mutex::new(children);
        pool.socket_dir = Some(dir);
        Ok(pool)
    }

    /// Build a pool over already-connected slot streams. Used by `spawn`
    /// and by tests that run the worker loop in-process.
    pub(crate) fn from_streams(streams: Vec<UnixStream>) -> Self {
        let capacity = streams.len();
        let (slot_tx, slot_rx) = mpsc::channel(capacity.max(1));
        for (index, stream) in streams.into_iter().enumerate() {
            // Channel has room for every slot; this cannot fail here.
            let _ = slot_tx.try_send(Slot::from_stream(index, stream));
        }

        Self {
            slot_tx,
            slot_rx: Mutex::new(slot_rx),
            capacity,
            live: SharedCount::new(capacity as i64),
            closed: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            socket_dir: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots still healthy. Shrinks permanently when a worker is lost.
    pub fn live_workers(&self) -> i64 {
        self.live.value()
    }

    fn restore(&self, slot: Slot) {
        let index = slot.index;
        if self.slot_tx.try_send(slot).is_err() {
            if self.is_closed() {
                tracing::debug!(slot = index, "Pool closed; dropping returned slot");
            } else {
                tracing::error!(slot = index, "Failed to return slot to pool");
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkerPool for ProcessPool {
    type Job = serde_json::Value;
    type Output = serde_json::Value;

    async fn dispatch(&self, input: serde_json::Value) -> Result<serde_json::Value, JobError> {
        if self.is_closed() {
            return Err(JobError::WorkerLost);
        }

        // `close` shuts the slot channel, so a dispatch that raced past the
        // check above resolves with `None` here instead of waiting forever
        // for a slot that will never come back.
        let mut slot = {
            let mut rx = self.slot_rx.lock().await;
            rx.recv().await.ok_or(JobError::WorkerLost)?
        };

        let id = JobId::new();
        match slot.run(id, input).await {
            Ok(output) => {
                self.restore(slot);
                Ok(output)
            }
            Err(err @ JobError::Failed { .. }) => {
                // The job failed but the worker answered; the slot is fine.
                self.restore(slot);
                Err(err)
            }
            Err(err) => {
                self.live.decrement();
                tracing::warn!(
                    slot = slot.index,
                    error = %err,
                    live = self.live.value(),
                    "Worker lost; pool capacity permanently reduced"
                );
                Err(err)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // All slots are idle by the time the executor closes us; tell each
        // worker to exit. Closing the receiver first stops slots from being
        // returned afterwards and lets any blocked `dispatch` observe the
        // channel as finished once it is empty.
        {
            let mut rx = self.slot_rx.lock().await;
            rx.close();
            while let Ok(mut slot) = rx.try_recv() {
                slot.send_shutdown().await;
            }
        }

        let mut children = std::mem::take(&mut *self.children.lock().await);
        for (i, child) in children.iter_mut().enumerate() {
            match tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(slot = i, %status, "Worker exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(slot = i, error = %e, "Failed to reap worker");
                }
                Err(_) => {
                    tracing::warn!(slot = i, "Worker did not exit in time; killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        if let Some(dir) = self.socket_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to clean up socket directory");
            }
        }
    }
}
