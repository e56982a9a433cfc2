use edrpc_codec::Value;

/// Errors that can settle an RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The engine answered with a non-null error field.
    #[error("engine returned an error: {0}")]
    Remote(Value),

    /// The session was dropped before a response arrived.
    #[error("rpc session closed before the response arrived")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, RpcError>;
