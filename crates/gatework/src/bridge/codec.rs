//! Framed codec for slot sockets.
//!
//! LengthDelimitedCodec for framing + serde_json for the payload. Works over
//! any AsyncRead/AsyncWrite, which is what lets the tests drive the worker
//! loop over an in-process socket pair.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Codec that frames messages with a 4-byte length prefix and serializes
/// them as JSON.
///
/// Frames are capped at [`DEFAULT_MAX_FRAME_LEN`] so a corrupt or hostile
/// length prefix cannot make the reader buffer without bound; oversized
/// frames fail the encode/decode instead.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

/// Job inputs and outputs are small JSON documents; 16 MiB is far above
/// anything legitimate on a slot socket.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{JobId, WorkRequest, WorkResponse};

    #[test]
    fn codec_roundtrip_request() {
        let mut codec = JsonCodec::<WorkRequest>::new();
        let mut buf = BytesMut::new();

        let id = JobId::new();
        let req = WorkRequest::Run {
            id,
            input: serde_json::json!({"region": "chr1:0-1000"}),
        };
        codec.encode(req, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        match decoded {
            WorkRequest::Run { id: got, input } => {
                assert_eq!(got, id);
                assert_eq!(input, serde_json::json!({"region": "chr1:0-1000"}));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn codec_roundtrip_response() {
        let mut codec = JsonCodec::<WorkResponse>::new();
        let mut buf = BytesMut::new();

        let id = JobId::new();
        let resp = WorkResponse::Failed {
            id,
            error: "boom".to_string(),
        };
        codec.encode(resp, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        match decoded {
            WorkResponse::Failed { id: got, error } => {
                assert_eq!(got, id);
                assert_eq!(error, "boom");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut small = JsonCodec::<WorkRequest>::with_max_frame_length(16);
        let mut buf = BytesMut::new();

        let req = WorkRequest::Run {
            id: JobId::new(),
            input: serde_json::json!({"payload": "x".repeat(64)}),
        };
        assert!(small.encode(req, &mut buf).is_err());

        // A frame produced under the default cap must not decode past a
        // smaller one either.
        let mut roomy = JsonCodec::<WorkRequest>::new();
        let mut wire = BytesMut::new();
        roomy
            .encode(
                WorkRequest::Run {
                    id: JobId::new(),
                    input: serde_json::json!({"payload": "y".repeat(64)}),
                },
                &mut wire,
            )
            .unwrap();
        assert!(small.decode(&mut wire).is_err());
    }

    #[test]
    fn decode_incomplete_frame_yields_none() {
        let mut codec = JsonCodec::<WorkRequest>::new();
        let mut buf = BytesMut::new();

        codec.encode(WorkRequest::Shutdown, &mut buf).unwrap();
        let partial = buf.split_to(buf.len() - 1);
        let mut partial = BytesMut::from(&partial[..]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }
}
