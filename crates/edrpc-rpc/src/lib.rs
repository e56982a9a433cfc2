//! msgpack-RPC multiplexer for editor-engine sessions.
//!
//! Frames outbound calls into the three-tag envelope convention (request /
//! response / notification), correlates concurrent in-flight requests with
//! out-of-order responses by id, and routes inbound notifications and
//! requests to registered callbacks. This layer never interprets method
//! names or payloads; it only frames, correlates, and dispatches.

pub mod envelope;
pub mod error;
pub mod session;

pub use envelope::Message;
pub use error::{Result, RpcError};
pub use session::{ResponseFuture, RpcSession};
