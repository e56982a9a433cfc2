use std::path::Path;

use edrpc_codec::Value;
use edrpc_rpc::{ResponseFuture, RpcSession};
use edrpc_transport::{Result, SessionTransport, TransportConfig};

/// A live RPC session with one or more engine processes.
///
/// Wires the transport's decoded-value stream into the multiplexer's
/// dispatch, and the multiplexer's encoded output into the transport's send
/// path. Several engine connections can be registered; exactly one is active
/// at a time (see [`switch_to`](Session::switch_to)).
pub struct Session {
    transport: SessionTransport,
    rpc: RpcSession,
}

impl Session {
    /// Endpoint id used by the single-connection [`connect`](Session::connect).
    const DEFAULT_PEER: u64 = 0;

    /// Create a session with no connections yet.
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a session with explicit connection tuning.
    pub fn with_config(config: TransportConfig) -> Self {
        // rpc -> encode -> transport; transport -> decode -> rpc.
        let transport = SessionTransport::with_config(config);
        let sender = transport.sender();
        let rpc = RpcSession::new(move |bytes| sender.send(bytes));
        let rpc_inbound = rpc.clone();
        transport.set_receiver(move |value| rpc_inbound.dispatch(value));
        Self { transport, rpc }
    }

    /// Connect to the engine socket at `path` and make it active.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let session = Self::new();
        session.connect_to(Self::DEFAULT_PEER, &path)?;
        session.switch_to(Self::DEFAULT_PEER)?;
        Ok(session)
    }

    /// Connect to an engine socket and register it under `id` without
    /// activating it.
    pub fn connect_to(&self, id: u64, path: impl AsRef<Path>) -> Result<()> {
        self.transport.connect_to(id, path)
    }

    /// Make the connection registered under `id` the active one, flushing
    /// anything queued while disconnected.
    pub fn switch_to(&self, id: u64) -> Result<()> {
        self.transport.switch_to(id)
    }

    /// Issue a request to the active engine; the returned future settles
    /// when the correlated response arrives.
    pub fn request(&self, method: impl Into<String>, params: Vec<Value>) -> ResponseFuture {
        self.rpc.request(method, params)
    }

    /// Send a fire-and-forget notification to the active engine.
    pub fn notify(&self, method: impl Into<String>, params: Vec<Value>) {
        self.rpc.notify(method, params)
    }

    /// Register a callback for inbound notifications named `method`.
    /// `"redraw"` registrations replace the previous one; all other names
    /// fan out.
    pub fn on_event(&self, method: &str, callback: impl Fn(Vec<Value>) + Send + Sync + 'static) {
        self.rpc.on_event(method, callback)
    }

    /// Register the handler for inbound engine-to-client requests named
    /// `method`.
    pub fn handle_request(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) {
        self.rpc.handle_request(method, handler)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}
