use tracing::warn;

use crate::value::{ExtHandle, Value};

/// MessagePack encoding of `[2, "redraw"`, the leading bytes of a redraw
/// notification (fixarray(3), fixint 2, fixstr "redraw").
const REDRAW_PREFIX: [u8; 9] = [0x93, 0x02, 0xa6, b'r', b'e', b'd', b'r', b'a', b'w'];

/// Signals that decoding ran past the available bytes. Not an error: the
/// working buffer is retained and parsing restarts on the next chunk.
struct Incomplete;

type Parse<T> = Result<T, Incomplete>;

/// Incremental MessagePack parser.
///
/// Feed byte chunks in any split; every complete top-level value contained in
/// the accumulated bytes is returned, and a trailing partial message is
/// retained verbatim for the next [`feed`](Decoder::feed) call.
///
/// # Redraw hot path
///
/// If a chunk begins with the encoding of a `[2, "redraw", …]` notification,
/// then for that chunk only, strings of length exactly one decode to their
/// raw code point as [`Value::UInt`] instead of a one-character
/// [`Value::Str`]. Redraw traffic is the highest-frequency event on the wire
/// and is dominated by single-cell strings; consumers of redraw payloads must
/// accept either shape. The flag is re-evaluated fresh on every chunk.
pub struct Decoder {
    /// Retained bytes of a message split across chunk boundaries.
    partial: Vec<u8>,
    /// Read offset into the current working buffer.
    pos: usize,
    /// One-char strings decode as raw code points for the current chunk.
    scalar_strings: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder with no retained state.
    pub fn new() -> Self {
        Self {
            partial: Vec::new(),
            pos: 0,
            scalar_strings: false,
        }
    }

    /// Parse all complete values out of `chunk` (prepended with any bytes
    /// retained from the previous call).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut work = std::mem::take(&mut self.partial);
        work.extend_from_slice(chunk);

        self.scalar_strings = work.starts_with(&REDRAW_PREFIX);
        self.pos = 0;

        let mut out = Vec::new();
        while self.pos < work.len() {
            match self.parse(&work) {
                Ok(value) => out.push(value),
                Err(Incomplete) => {
                    // Keep the whole working buffer; the next feed restarts
                    // from offset zero over (retained ++ new chunk).
                    self.partial = work;
                    return out;
                }
            }
        }
        out
    }

    fn parse(&mut self, buf: &[u8]) -> Parse<Value> {
        let tag = *buf.get(self.pos).ok_or(Incomplete)?;
        self.pos += 1;

        match tag {
            // positive fixint
            0x00..=0x7f => Ok(Value::UInt(u64::from(tag))),
            // fixmap
            0x80..=0x8f => self.parse_map(buf, usize::from(tag & 0x0f)),
            // fixarray
            0x90..=0x9f => self.parse_array(buf, usize::from(tag & 0x0f)),
            // fixstr
            0xa0..=0xbf => self.parse_str(buf, usize::from(tag - 0xa0)),
            0xc0 => Ok(Value::Nil),
            0xc2 => Ok(Value::Bool(false)),
            0xc3 => Ok(Value::Bool(true)),
            // ext8/16/32
            0xc7 => {
                let len = usize::from(self.read_u8(buf)?);
                self.parse_ext(buf, len)
            }
            0xc8 => {
                let len = usize::from(self.read_u16(buf)?);
                self.parse_ext(buf, len)
            }
            0xc9 => {
                let len = self.read_u32(buf)? as usize;
                self.parse_ext(buf, len)
            }
            // float32/float64
            0xca => {
                let bits = self.read_exact::<4>(buf)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes(bits))))
            }
            0xcb => {
                let bits = self.read_exact::<8>(buf)?;
                Ok(Value::Float(f64::from_be_bytes(bits)))
            }
            // uint8/16/32/64
            0xcc => Ok(Value::UInt(u64::from(self.read_u8(buf)?))),
            0xcd => Ok(Value::UInt(u64::from(self.read_u16(buf)?))),
            0xce => Ok(Value::UInt(u64::from(self.read_u32(buf)?))),
            0xcf => Ok(Value::UInt(self.read_u64(buf)?)),
            // int8/16/32/64
            0xd0 => Ok(Value::Int(i64::from(self.read_u8(buf)? as i8))),
            0xd1 => Ok(Value::Int(i64::from(self.read_u16(buf)? as i16))),
            0xd2 => Ok(Value::Int(i64::from(self.read_u32(buf)? as i32))),
            0xd3 => Ok(Value::Int(self.read_u64(buf)? as i64)),
            // fixext1/2/4/8/16
            0xd4 => self.parse_ext(buf, 1),
            0xd5 => self.parse_ext(buf, 2),
            0xd6 => self.parse_ext(buf, 4),
            0xd7 => self.parse_ext(buf, 8),
            0xd8 => self.parse_ext(buf, 16),
            // str8/16/32
            0xd9 => {
                let len = usize::from(self.read_u8(buf)?);
                self.parse_str(buf, len)
            }
            0xda => {
                let len = usize::from(self.read_u16(buf)?);
                self.parse_str(buf, len)
            }
            0xdb => {
                let len = self.read_u32(buf)? as usize;
                self.parse_str(buf, len)
            }
            // array16/32
            0xdc => {
                let len = usize::from(self.read_u16(buf)?);
                self.parse_array(buf, len)
            }
            0xdd => {
                let len = self.read_u32(buf)? as usize;
                self.parse_array(buf, len)
            }
            // map16/32
            0xde => {
                let len = usize::from(self.read_u16(buf)?);
                self.parse_map(buf, len)
            }
            0xdf => {
                let len = self.read_u32(buf)? as usize;
                self.parse_map(buf, len)
            }
            // negative fixint
            0xe0..=0xff => Ok(Value::Int(i64::from(tag as i8))),
            // 0xc1 (reserved) and 0xc4-0xc6 (bin; the engine never sends
            // these). Skip exactly one byte so the parse loop resyncs
            // instead of hanging.
            _ => {
                warn!(tag = format_args!("{tag:#04x}"), "unrecognized msgpack tag");
                Ok(Value::Nil)
            }
        }
    }

    fn parse_str(&mut self, buf: &[u8], len: usize) -> Parse<Value> {
        self.need(buf, len)?;
        let bytes = &buf[self.pos..self.pos + len];
        self.pos += len;

        if len == 1 && self.scalar_strings {
            return Ok(Value::UInt(u64::from(bytes[0])));
        }
        Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn parse_array(&mut self, buf: &[u8], len: usize) -> Parse<Value> {
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(self.parse(buf)?);
        }
        Ok(Value::Array(items))
    }

    fn parse_map(&mut self, buf: &[u8], len: usize) -> Parse<Value> {
        let mut pairs = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            let key = self.parse(buf)?;
            let val = self.parse(buf)?;
            pairs.push((key, val));
        }
        Ok(Value::Map(pairs))
    }

    fn parse_ext(&mut self, buf: &[u8], len: usize) -> Parse<Value> {
        let kind = self.read_u8(buf)? as i8;
        self.need(buf, len)?;
        let end = self.pos + len;
        // The handle id is one complete value confined to the ext payload.
        let id = self.parse(&buf[..end])?;
        self.pos = end;
        Ok(Value::Ext(ExtHandle {
            kind,
            id: Box::new(id),
        }))
    }

    fn need(&self, buf: &[u8], n: usize) -> Parse<()> {
        match self.pos.checked_add(n) {
            Some(end) if end <= buf.len() => Ok(()),
            _ => Err(Incomplete),
        }
    }

    fn read_exact<const N: usize>(&mut self, buf: &[u8]) -> Parse<[u8; N]> {
        self.need(buf, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn read_u8(&mut self, buf: &[u8]) -> Parse<u8> {
        let byte = *buf.get(self.pos).ok_or(Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, buf: &[u8]) -> Parse<u16> {
        Ok(u16::from_be_bytes(self.read_exact::<2>(buf)?))
    }

    fn read_u32(&mut self, buf: &[u8]) -> Parse<u32> {
        Ok(u32::from_be_bytes(self.read_exact::<4>(buf)?))
    }

    fn read_u64(&mut self, buf: &[u8]) -> Parse<u64> {
        Ok(u64::from_be_bytes(self.read_exact::<8>(buf)?))
    }
}
