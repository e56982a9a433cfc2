use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use edrpc_codec::{encode, Value};
use tracing::{trace, warn};

use crate::envelope::Message;
use crate::error::{Result, RpcError};

/// Reply sent for an inbound request naming a method nobody registered.
const NO_HANDLER_REPLY: &str = "no one was listening for your request, sorry";

/// Handles one inbound request; an `Err` string becomes the wire error field.
pub type RequestHandler =
    Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync>;

/// Invoked with the params of an inbound notification.
pub type EventCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Request/response correlation and notification dispatch over an abstract
/// byte sink.
///
/// Each session owns its own pending-request table and registries, so
/// several independent engine connections can coexist in one process. All
/// state is mutex-guarded; callbacks are invoked with no lock held.
#[derive(Clone)]
pub struct RpcSession {
    inner: Arc<Inner>,
}

struct Inner {
    sink: Box<dyn Fn(Bytes) + Send + Sync>,
    next_id: AtomicU64,
    /// Correlation id → waiter. Entries whose response never arrives are
    /// left in place; there is deliberately no timeout at this layer.
    pending: Mutex<HashMap<u64, SyncSender<Result<Value>>>>,
    handlers: Mutex<HashMap<String, RequestHandler>>,
    watchers: Mutex<HashMap<String, Vec<EventCallback>>>,
    /// Redraw is the highest-frequency event on the wire, so it gets a
    /// single replaceable slot instead of fan-out. A narrow, deliberate
    /// exception; everything else goes through `watchers`.
    redraw: Mutex<Option<EventCallback>>,
}

/// Settles when the response correlated with one request arrives.
pub struct ResponseFuture {
    rx: Receiver<Result<Value>>,
}

impl ResponseFuture {
    /// Block until the response arrives. There is no timeout: if the engine
    /// never answers, this waits forever (matching the protocol layer's
    /// no-cancellation contract).
    pub fn wait(self) -> Result<Value> {
        self.rx.recv().unwrap_or(Err(RpcError::SessionClosed))
    }

    /// Block until the response arrives or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl RpcSession {
    /// Create a session writing encoded outbound messages to `sink`.
    pub fn new(sink: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink: Box::new(sink),
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                redraw: Mutex::new(None),
            }),
        }
    }

    /// Send `[0, id, method, params]` and return a handle that settles when
    /// the response carrying that id is dispatched.
    pub fn request(&self, method: impl Into<String>, params: Vec<Value>) -> ResponseFuture {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = sync_channel(1);

        // Register before sending so a response racing back on the reader
        // thread always finds its entry.
        self.inner
            .pending
            .lock()
            .expect("pending table poisoned")
            .insert(id, tx);

        self.send_message(Message::Request {
            id,
            method: method.into(),
            params,
        });
        ResponseFuture { rx }
    }

    /// Send `[2, method, params]`; fire-and-forget.
    pub fn notify(&self, method: impl Into<String>, params: Vec<Value>) {
        self.send_message(Message::Notification {
            method: method.into(),
            params,
        });
    }

    /// Register the handler for inbound requests naming `method`.
    ///
    /// One handler per method; the last registration wins.
    pub fn handle_request(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) {
        self.inner
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .insert(method.into(), Arc::new(handler));
    }

    /// Register a callback for inbound notifications naming `method`.
    ///
    /// For `"redraw"` the registration REPLACES any previous one (single
    /// slot, no fan-out); for every other name it is added to the set of
    /// callbacks, all of which are invoked.
    pub fn on_event(&self, method: &str, callback: impl Fn(Vec<Value>) + Send + Sync + 'static) {
        if method == "redraw" {
            *self.inner.redraw.lock().expect("redraw slot poisoned") = Some(Arc::new(callback));
        } else {
            self.inner
                .watchers
                .lock()
                .expect("watcher registry poisoned")
                .entry(method.to_string())
                .or_default()
                .push(Arc::new(callback));
        }
    }

    /// Route one decoded inbound value.
    ///
    /// Values are dispatched in the order they are decoded off the wire.
    /// Nothing here is fatal: malformed envelopes, unknown methods, and
    /// handler panics are absorbed so the next message can be processed.
    pub fn dispatch(&self, value: Value) {
        let Some(message) = Message::from_value(value) else {
            return;
        };
        match message {
            Message::Request { id, method, params } => self.on_request(id, &method, params),
            Message::Response { id, error, result } => self.on_response(id, error, result),
            Message::Notification { method, params } => self.on_notification(&method, params),
        }
    }

    fn on_request(&self, id: u64, method: &str, params: Vec<Value>) {
        let handler = self
            .inner
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .get(method)
            .cloned();

        let Some(handler) = handler else {
            self.send_message(Message::Response {
                id,
                error: Value::Str(NO_HANDLER_REPLY.into()),
                result: Value::Nil,
            });
            return;
        };

        let (error, result) = match catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(Ok(result)) => (Value::Nil, result),
            Ok(Err(description)) => (Value::Str(description), Value::Nil),
            Err(_) => {
                warn!(method, "request handler panicked");
                (Value::Str(format!("handler for {method} panicked")), Value::Nil)
            }
        };
        self.send_message(Message::Response { id, error, result });
    }

    fn on_response(&self, id: u64, error: Value, result: Value) {
        let waiter = self
            .inner
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&id);

        let Some(waiter) = waiter else {
            trace!(id, "response without a pending request; ignoring");
            return;
        };

        let outcome = if error.is_nil() {
            Ok(result)
        } else {
            Err(RpcError::Remote(error))
        };
        // The caller may have dropped its future; settling into a closed
        // channel is fine.
        let _ = waiter.send(outcome);
    }

    fn on_notification(&self, method: &str, params: Vec<Value>) {
        if method == "redraw" {
            let callback = self
                .inner
                .redraw
                .lock()
                .expect("redraw slot poisoned")
                .clone();
            if let Some(callback) = callback {
                callback(params);
            }
            return;
        }

        let callbacks = self
            .inner
            .watchers
            .lock()
            .expect("watcher registry poisoned")
            .get(method)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            callback(params.clone());
        }
    }

    fn send_message(&self, message: Message) {
        (self.inner.sink)(encode(&message.into_value()));
    }
}
