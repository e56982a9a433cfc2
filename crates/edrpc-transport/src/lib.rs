//! Socket transport for editor-engine RPC.
//!
//! Owns the live byte connection to an engine process. Each engine instance
//! exposes one local domain socket; this crate connects to it (with retry),
//! pipes inbound bytes through the streaming decoder, and buffers outbound
//! traffic whenever no connection is active. Several engine connections can
//! be held at once with exactly one active at a time; see
//! [`SessionTransport::switch_to`].
//!
//! This crate never spawns or supervises engine processes; it is handed
//! endpoint paths by an external collaborator.

pub mod error;
pub mod pipe;
pub mod session;

pub use error::{Result, TransportError};
pub use pipe::{connect_with_retry, PipeStream};
pub use session::{Sender, SessionTransport, TransportConfig};
