//! Worker subprocess — the child side of the slot protocol.
//!
//! A worker binary implements [`JobRunner`], connects to the slot socket it
//! was handed on the command line, and serves one request at a time until
//! the parent says shutdown or the socket closes. All admission control and
//! size accounting stay in the parent; the worker only ever answers frames.
//!
//! `serve_slot` is generic over the stream so tests can drive the loop over
//! an in-process socket pair.

use std::io;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{JobId, WorkRequest, WorkResponse};

/// The work a worker process knows how to do.
///
/// Jobs are opaque to the framework: arbitrary, possibly slow, possibly
/// failing. An error return becomes a `Failed` frame and a captured
/// [`JobError::Failed`](crate::JobError::Failed) on the parent's handle;
/// the worker itself keeps serving.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, id: JobId, input: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Serve one slot: decode requests, run them, answer with their terminal
/// outcome. Returns on `Shutdown` or when the parent closes the socket.
pub async fn serve_slot<S, R>(stream: S, runner: &R) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite,
    R: JobRunner,
{
    let (read, write) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read, JsonCodec::<WorkRequest>::new());
    let mut writer = FramedWrite::new(write, JsonCodec::<WorkResponse>::new());

    while let Some(frame) = reader.next().await {
        match frame? {
            WorkRequest::Run { id, input } => {
                tracing::debug!(job = %id, "Running job");
                let response = match runner.run(id, input).await {
                    Ok(output) => WorkResponse::Done { id, output },
                    Err(error) => {
                        tracing::debug!(job = %id, error = %error, "Job reported failure");
                        WorkResponse::Failed { id, error }
                    }
                };
                // Every request gets exactly one reply; the parent ties
                // permit release to it.
                writer.send(response).await?;
            }
            WorkRequest::Shutdown => {
                tracing::debug!("Shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Entry point for a worker binary: connect to the slot socket the parent
/// bound for us and serve it.
pub async fn run_worker<R: JobRunner>(socket: impl AsRef<Path>, runner: &R) -> io::Result<()> {
    let socket = socket.as_ref();
    tracing::debug!(socket = %socket.display(), "Connecting to slot socket");
    let stream = UnixStream::connect(socket).await?;
    serve_slot(stream, runner).await
}
