use edrpc_codec::Value;
use tracing::warn;

/// Envelope tag for a request.
pub const REQUEST: u64 = 0;
/// Envelope tag for a response.
pub const RESPONSE: u64 = 1;
/// Envelope tag for a notification.
pub const NOTIFICATION: u64 = 2;

/// One msgpack-RPC envelope: a 3- or 4-element array tagged by its leading
/// integer.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `[0, id, method, params]`
    Request {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
    /// `[1, id, error, result]`, where `error` is `Nil` on success.
    Response { id: u64, error: Value, result: Value },
    /// `[2, method, params]`
    Notification { method: String, params: Vec<Value> },
}

impl Message {
    /// Parse a decoded value as an envelope.
    ///
    /// Malformed envelopes are logged and dropped (`None`); a misbehaving
    /// peer must not be able to take the dispatch loop down.
    pub fn from_value(value: Value) -> Option<Message> {
        let Value::Array(mut items) = value else {
            warn!("inbound message is not an array envelope");
            return None;
        };

        let tag = items.first().and_then(Value::as_u64);
        match (tag, items.len()) {
            (Some(REQUEST), 4) => {
                let params = params_of(items.pop()?);
                let method = method_of(items.pop()?)?;
                let id = items.pop()?.as_u64()?;
                Some(Message::Request { id, method, params })
            }
            (Some(RESPONSE), 4) => {
                let result = items.pop()?;
                let error = items.pop()?;
                let id = items.pop()?.as_u64()?;
                Some(Message::Response { id, error, result })
            }
            (Some(NOTIFICATION), 3) => {
                let params = params_of(items.pop()?);
                let method = method_of(items.pop()?)?;
                Some(Message::Notification { method, params })
            }
            _ => {
                warn!(?tag, len = items.len(), "malformed rpc envelope");
                None
            }
        }
    }

    /// Build the wire value for this envelope.
    pub fn into_value(self) -> Value {
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                Value::UInt(REQUEST),
                Value::UInt(id),
                Value::Str(method),
                Value::Array(params),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                Value::UInt(RESPONSE),
                Value::UInt(id),
                error,
                result,
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::UInt(NOTIFICATION),
                Value::Str(method),
                Value::Array(params),
            ]),
        }
    }
}

fn method_of(value: Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s),
        other => {
            warn!(%other, "rpc method name is not a string");
            None
        }
    }
}

/// Params normally arrive as an array; a bare value is wrapped so handlers
/// always see a slice.
fn params_of(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Nil => Vec::new(),
        other => vec![other],
    }
}
