use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Connection attempts kept failing until the deadline passed.
    #[error("gave up connecting to {path} after {waited:?}")]
    ConnectTimeout { path: PathBuf, waited: Duration },

    /// No connection is registered under this endpoint id.
    #[error("unknown peer endpoint {0}")]
    UnknownPeer(u64),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
