use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;
use edrpc_codec::{Decoder, Value};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::pipe::{connect_with_retry, PipeStream};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Connection-establishment tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Delay between connection attempts while the engine socket is absent.
    pub retry_interval: Duration,
    /// Overall deadline for a single `connect_to` call.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns the live connections to one or more engine processes.
///
/// Exactly one registered connection is active at a time. Inbound bytes from
/// the active connection are decoded and handed to the value sink; inactive
/// connections are simply not drained (their bytes wait in the socket
/// buffer). Outbound bytes sent while no connection is active are queued and
/// flushed, in original send order, as soon as one becomes active.
pub struct SessionTransport {
    shared: Arc<Shared>,
}

/// Cheap cloneable handle for queuing outbound bytes on a transport.
///
/// Holds a weak reference: sending after the transport is gone is a no-op.
#[derive(Clone)]
pub struct Sender {
    shared: std::sync::Weak<Shared>,
}

impl Sender {
    /// See [`SessionTransport::send`].
    pub fn send(&self, bytes: Bytes) {
        if let Some(shared) = self.shared.upgrade() {
            send_bytes(&shared, bytes);
        }
    }
}

type ValueSink = Arc<dyn Fn(Value) + Send + Sync>;

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    sink: Mutex<ValueSink>,
    config: TransportConfig,
}

struct State {
    clients: HashMap<u64, Client>,
    active: Option<u64>,
    /// Outbound messages queued while disconnected, oldest first.
    queued: Vec<Bytes>,
    closed: bool,
    next_generation: u64,
}

struct Client {
    path: PathBuf,
    writer: PipeStream,
    /// Distinguishes a reconnected endpoint from the connection a stale
    /// reader thread was spawned for.
    generation: u64,
}

impl SessionTransport {
    /// Create a transport with default connection tuning.
    ///
    /// Inbound values are dropped (with a warning) until
    /// [`set_receiver`](SessionTransport::set_receiver) is called.
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with explicit connection tuning.
    pub fn with_config(config: TransportConfig) -> Self {
        let unset: ValueSink = Arc::new(|_| {
            warn!("decoded value arrived before a receiver was set; dropped");
        });
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    clients: HashMap::new(),
                    active: None,
                    queued: Vec::new(),
                    closed: false,
                    next_generation: 0,
                }),
                cond: Condvar::new(),
                sink: Mutex::new(unset),
                config,
            }),
        }
    }

    /// Set (or replace) the callback receiving decoded inbound values.
    pub fn set_receiver(&self, sink: impl Fn(Value) + Send + Sync + 'static) {
        *self.shared.sink.lock().expect("value sink poisoned") = Arc::new(sink);
    }

    /// A cloneable outbound handle, usable after this transport is handed
    /// elsewhere.
    pub fn sender(&self) -> Sender {
        Sender {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Connect to the engine socket at `path` and register it under `id`.
    ///
    /// Retries at the configured interval until the configured timeout;
    /// never-connecting surfaces as an error to this caller. The connection
    /// is registered but NOT activated; call [`switch_to`] for that.
    ///
    /// [`switch_to`]: SessionTransport::switch_to
    pub fn connect_to(&self, id: u64, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let stream = connect_with_retry(
            &path,
            self.shared.config.retry_interval,
            self.shared.config.connect_timeout,
        )?;
        let reader = stream.try_clone()?;

        let generation = {
            let mut state = self.shared.state.lock().expect("transport state poisoned");
            let generation = state.next_generation;
            state.next_generation += 1;

            if let Some(old) = state.clients.insert(
                id,
                Client {
                    path: path.clone(),
                    writer: stream,
                    generation,
                },
            ) {
                debug!(id, path = ?old.path, "replacing existing engine connection");
                let _ = old.writer.shutdown();
            }
            generation
        };

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name(format!("edrpc-read-{id}"))
            .spawn(move || run_reader(shared, id, generation, reader))?;

        debug!(id, ?path, "engine connection registered");
        Ok(())
    }

    /// Make the connection registered under `id` the active one.
    ///
    /// Detaches the previously active connection (its reader stops draining,
    /// nothing buffered is discarded) and flushes any messages queued while
    /// disconnected, in their original send order.
    pub fn switch_to(&self, id: u64) -> Result<()> {
        let mut state = self.shared.state.lock().expect("transport state poisoned");
        if !state.clients.contains_key(&id) {
            return Err(TransportError::UnknownPeer(id));
        }

        state.active = Some(id);
        let result = flush_queued(&mut state, id);
        self.shared.cond.notify_all();
        result
    }

    /// Hand bytes to the active connection, or queue them if there is none.
    ///
    /// Never fails: a connection that dies mid-write is detached, the
    /// message is re-queued, and a warning is logged.
    pub fn send(&self, bytes: Bytes) {
        send_bytes(&self.shared, bytes);
    }

    /// Endpoint id of the currently active connection, if any.
    pub fn active_peer(&self) -> Option<u64> {
        self.shared
            .state
            .lock()
            .expect("transport state poisoned")
            .active
    }

    /// Close every connection and stop all reader threads.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock().expect("transport state poisoned");
        state.closed = true;
        state.active = None;
        for client in state.clients.values() {
            let _ = client.writer.shutdown();
        }
        state.clients.clear();
        self.shared.cond.notify_all();
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_bytes(shared: &Shared, bytes: Bytes) {
    let mut state = shared.state.lock().expect("transport state poisoned");

    let Some(id) = state.active else {
        state.queued.push(bytes);
        return;
    };

    let write = match state.clients.get_mut(&id) {
        Some(client) => client
            .writer
            .write_all(&bytes)
            .and_then(|()| client.writer.flush()),
        None => {
            state.queued.push(bytes);
            return;
        }
    };

    if let Err(err) = write {
        warn!(id, %err, "write to engine failed; queuing message");
        state.clients.remove(&id);
        state.active = None;
        state.queued.push(bytes);
    }
}

/// Write queued messages to `id`, oldest first. Unsent messages (including
/// the one that failed) stay queued and the dead connection is detached.
fn flush_queued(state: &mut State, id: u64) -> Result<()> {
    if state.queued.is_empty() {
        return Ok(());
    }

    let queued = std::mem::take(&mut state.queued);

    for (i, bytes) in queued.iter().enumerate() {
        let write = match state.clients.get_mut(&id) {
            Some(client) => client
                .writer
                .write_all(bytes)
                .and_then(|()| client.writer.flush()),
            None => Err(std::io::Error::new(
                ErrorKind::NotConnected,
                "connection detached during flush",
            )),
        };
        if let Err(err) = write {
            warn!(id, %err, "flush to engine failed; re-queuing");
            state.queued = queued[i..].to_vec();
            state.clients.remove(&id);
            state.active = None;
            return Err(err.into());
        }
    }
    debug!(id, count = queued.len(), "flushed queued messages");
    Ok(())
}

/// Reader loop: drain the socket only while this connection is active, feed
/// chunks through the decoder, and hand each decoded value to the sink.
///
/// A read that was already blocked when the connection was switched away can
/// still complete long after the switch. Its values are decoded (no bytes
/// are lost) but held, and delivered only once this connection is active
/// again, so an inactive peer never speaks through the active slot.
fn run_reader(shared: Arc<Shared>, id: u64, generation: u64, mut stream: PipeStream) {
    let mut decoder = Decoder::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut held: Vec<Value> = Vec::new();

    loop {
        {
            let mut state = shared.state.lock().expect("transport state poisoned");
            loop {
                if state.closed || !is_current(&state, id, generation) {
                    return;
                }
                if state.active == Some(id) {
                    break;
                }
                state = shared
                    .cond
                    .wait(state)
                    .expect("transport state poisoned");
            }
        }

        if !held.is_empty() {
            deliver(&shared, &mut held);
        }

        let read = match stream.read(&mut chunk) {
            Ok(0) => {
                detach(&shared, id, generation, "engine closed connection");
                return;
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                detach(&shared, id, generation, &err.to_string());
                return;
            }
        };

        held.extend(decoder.feed(&chunk[..read]));
        if held.is_empty() {
            continue;
        }

        // The switch may have happened while read() was blocked.
        let active = {
            let state = shared.state.lock().expect("transport state poisoned");
            if state.closed || !is_current(&state, id, generation) {
                return;
            }
            state.active == Some(id)
        };
        if active {
            deliver(&shared, &mut held);
        }
    }
}

fn deliver(shared: &Shared, values: &mut Vec<Value>) {
    let sink = Arc::clone(&shared.sink.lock().expect("value sink poisoned"));
    for value in values.drain(..) {
        sink(value);
    }
}

fn is_current(state: &State, id: u64, generation: u64) -> bool {
    state
        .clients
        .get(&id)
        .is_some_and(|client| client.generation == generation)
}

fn detach(shared: &Shared, id: u64, generation: u64, reason: &str) {
    let mut state = shared.state.lock().expect("transport state poisoned");
    if !is_current(&state, id, generation) {
        return;
    }
    debug!(id, reason, "detaching engine connection");
    state.clients.remove(&id);
    if state.active == Some(id) {
        state.active = None;
    }
}
