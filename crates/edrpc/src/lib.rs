//! msgpack-RPC client core for embedded editor engines.
//!
//! edrpc talks to an editor-engine process over a local domain socket using
//! the msgpack-RPC envelope convention (request / response / notification).
//! It frames, encodes, decodes, and correlates messages. It never interprets
//! what a method name or payload means, and it never spawns or supervises
//! the engine process.
//!
//! # Crate Structure
//!
//! - [`codec`]: MessagePack value model, incremental decoder, encoder
//! - [`transport`]: socket connection with retry, buffering, and switching
//! - [`rpc`]: request/response multiplexer and notification dispatch
//! - [`Session`]: the high-level layer tying the three together

/// Re-export codec types.
pub mod codec {
    pub use edrpc_codec::*;
}

/// Re-export transport types.
pub mod transport {
    pub use edrpc_transport::*;
}

/// Re-export rpc types.
pub mod rpc {
    pub use edrpc_rpc::*;
}

mod session;

pub use edrpc_codec::{ExtHandle, Value};
pub use edrpc_rpc::{ResponseFuture, RpcError};
pub use edrpc_transport::TransportError;
pub use session::Session;
