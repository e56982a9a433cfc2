//! Streaming MessagePack codec for editor-engine RPC.
//!
//! This is the bottom layer of edrpc. The wire format is self-describing
//! MessagePack; messages arrive as arbitrary byte chunks off a socket, so the
//! [`Decoder`] parses incrementally across chunk boundaries and never drops a
//! trailing partial message. The [`encode`] half is stateless and always
//! picks the minimal encoding width.
//!
//! No partial-message handling in user code: feed chunks in, get complete
//! values out.

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::Decoder;
pub use encode::{encode, encode_into};
pub use value::{ExtHandle, Value};
