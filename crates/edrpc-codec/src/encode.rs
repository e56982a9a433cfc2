use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::value::{ExtHandle, Value};

/// Encode a value to its minimal-width MessagePack bytes.
pub fn encode(value: &Value) -> Bytes {
    let mut dst = BytesMut::new();
    encode_into(value, &mut dst);
    dst.freeze()
}

/// Encode a value into an existing buffer.
///
/// Stateless and infallible: every [`Value`] variant has a wire form. The
/// local side only produces integers in 32-bit range; anything wider is
/// logged and emitted at 64-bit width rather than truncated.
pub fn encode_into(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::Nil => dst.put_u8(0xc0),
        Value::Bool(false) => dst.put_u8(0xc2),
        Value::Bool(true) => dst.put_u8(0xc3),
        Value::UInt(n) => encode_uint(*n, dst),
        Value::Int(n) => encode_int(*n, dst),
        Value::Float(x) => {
            dst.put_u8(0xcb);
            dst.put_f64(*x);
        }
        Value::Str(s) => encode_str(s, dst),
        Value::Array(items) => {
            encode_array_header(items.len(), dst);
            for item in items {
                encode_into(item, dst);
            }
        }
        Value::Map(pairs) => {
            encode_map_header(pairs.len(), dst);
            for (key, val) in pairs {
                encode_into(key, dst);
                encode_into(val, dst);
            }
        }
        Value::Ext(handle) => encode_ext(handle, dst),
    }
}

fn encode_uint(n: u64, dst: &mut BytesMut) {
    if n <= 0x7f {
        dst.put_u8(n as u8);
    } else if n <= u64::from(u8::MAX) {
        dst.put_u8(0xcc);
        dst.put_u8(n as u8);
    } else if n <= u64::from(u16::MAX) {
        dst.put_u8(0xcd);
        dst.put_u16(n as u16);
    } else if n <= u64::from(u32::MAX) {
        dst.put_u8(0xce);
        dst.put_u32(n as u32);
    } else {
        warn!(value = n, "encoding integer beyond 32-bit range");
        dst.put_u8(0xcf);
        dst.put_u64(n);
    }
}

fn encode_int(n: i64, dst: &mut BytesMut) {
    if n >= 0 {
        return encode_uint(n as u64, dst);
    }
    if n >= -32 {
        dst.put_u8(n as u8);
    } else if n >= i64::from(i8::MIN) {
        dst.put_u8(0xd0);
        dst.put_i8(n as i8);
    } else if n >= i64::from(i16::MIN) {
        dst.put_u8(0xd1);
        dst.put_i16(n as i16);
    } else if n >= i64::from(i32::MIN) {
        dst.put_u8(0xd2);
        dst.put_i32(n as i32);
    } else {
        warn!(value = n, "encoding integer beyond 32-bit range");
        dst.put_u8(0xd3);
        dst.put_i64(n);
    }
}

fn encode_str(s: &str, dst: &mut BytesMut) {
    let len = s.len();
    if len < 32 {
        dst.put_u8(0xa0 | len as u8);
    } else if len <= usize::from(u8::MAX) {
        dst.put_u8(0xd9);
        dst.put_u8(len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(0xda);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(0xdb);
        dst.put_u32(len as u32);
    }
    dst.put_slice(s.as_bytes());
}

fn encode_array_header(len: usize, dst: &mut BytesMut) {
    if len < 16 {
        dst.put_u8(0x90 | len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(0xdc);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(0xdd);
        dst.put_u32(len as u32);
    }
}

fn encode_map_header(len: usize, dst: &mut BytesMut) {
    if len < 16 {
        dst.put_u8(0x80 | len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(0xde);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(0xdf);
        dst.put_u32(len as u32);
    }
}

fn encode_ext(handle: &ExtHandle, dst: &mut BytesMut) {
    let id = encode(&handle.id);
    match id.len() {
        1 => dst.put_u8(0xd4),
        2 => dst.put_u8(0xd5),
        4 => dst.put_u8(0xd6),
        8 => dst.put_u8(0xd7),
        16 => dst.put_u8(0xd8),
        len if len <= usize::from(u8::MAX) => {
            dst.put_u8(0xc7);
            dst.put_u8(len as u8);
        }
        len if len <= usize::from(u16::MAX) => {
            dst.put_u8(0xc8);
            dst.put_u16(len as u16);
        }
        len => {
            dst.put_u8(0xc9);
            dst.put_u32(len as u32);
        }
    }
    dst.put_i8(handle.kind);
    dst.put_slice(&id);
}
