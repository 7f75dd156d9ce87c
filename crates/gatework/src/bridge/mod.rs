//! Parent↔worker IPC for process-backed pools.
//!
//! Messages are length-prefixed JSON frames over per-slot Unix sockets.
//! The parent owns all admission control and size accounting; workers only
//! ever see `WorkRequest` frames and answer with `WorkResponse` frames.

pub mod codec;
pub mod protocol;

pub use codec::JsonCodec;
pub use protocol::{JobId, WorkRequest, WorkResponse};
