//! Little-endian wire primitives shared by every packet and chain object.
//!
//! Reading goes through [`WireReader`], a bounds-checked cursor over a byte
//! slice. Writing goes through the [`WireWrite`] extension trait, which is
//! implemented for every [`BufMut`].

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::hash::Hash256;

/// Failure while parsing wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("short read: needed {needed} bytes, {remaining} remaining")]
    ShortRead { needed: usize, remaining: usize },

    #[error("{what} count {count} exceeds limit {max}")]
    CountTooLarge {
        what: &'static str,
        count: u64,
        max: u64,
    },

    #[error("{what} length {len} exceeds limit {max}")]
    StringTooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("non-ascii bytes in {0}")]
    NonAscii(&'static str),

    #[error("invalid {0}")]
    Invalid(&'static str),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Objects with a canonical wire encoding.
pub trait WireEncode {
    /// Exact number of bytes [`WireEncode::encode_into`] writes.
    fn wire_size(&self) -> usize;

    fn encode_into<B: BufMut>(&self, buf: &mut B);

    fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        self.encode_into(&mut out);
        out
    }
}

/// Objects that can be parsed from a [`WireReader`].
pub trait WireDecode: Sized {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self>;

    /// Decode a whole buffer, rejecting trailing bytes.
    fn from_wire(data: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(data);
        let value = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

/// Bounds-checked cursor over a borrowed payload.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, needed: usize) -> DecodeResult<()> {
        if self.buf.len() < needed {
            return Err(DecodeError::ShortRead {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16_be(&mut self) -> DecodeResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_bytes(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_hash(&mut self) -> DecodeResult<Hash256> {
        Ok(Hash256::new(self.read_array()?))
    }

    /// Bitcoin CompactSize integer.
    pub fn read_varint(&mut self) -> DecodeResult<u64> {
        match self.read_u8()? {
            0xfd => Ok(self.read_u16()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    /// Read an element count and enforce a hard cap.
    pub fn read_count(&mut self, what: &'static str, max: usize) -> DecodeResult<usize> {
        let count = self.read_varint()?;
        if count > max as u64 {
            return Err(DecodeError::CountTooLarge {
                what,
                count,
                max: max as u64,
            });
        }
        Ok(count as usize)
    }

    /// Read an element count whose items each take at least one byte.
    pub fn read_bounded_count(&mut self, what: &'static str) -> DecodeResult<usize> {
        let max = self.remaining();
        self.read_count(what, max)
    }

    pub fn read_var_bytes(&mut self, what: &'static str, max: usize) -> DecodeResult<&'a [u8]> {
        let len = self.read_varint()?;
        if len > max as u64 {
            return Err(DecodeError::StringTooLong {
                what,
                len: usize::try_from(len).unwrap_or(usize::MAX),
                max,
            });
        }
        self.read_bytes(len as usize)
    }

    pub fn read_var_str(&mut self, what: &'static str, max: usize) -> DecodeResult<String> {
        let raw = self.read_var_bytes(what, max)?;
        if !raw.is_ascii() {
            return Err(DecodeError::NonAscii(what));
        }
        Ok(raw.iter().map(|&b| b as char).collect())
    }

    /// Consume everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Fail if any bytes are left unread.
    pub fn finish(self) -> DecodeResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.buf.len()))
        }
    }
}

/// Extension methods for writing Bitcoin-style variable-length fields.
pub trait WireWrite: BufMut {
    fn put_varint(&mut self, n: u64) {
        if n < 0xfd {
            self.put_u8(n as u8);
        } else if n <= 0xffff {
            self.put_u8(0xfd);
            self.put_u16_le(n as u16);
        } else if n <= 0xffff_ffff {
            self.put_u8(0xfe);
            self.put_u32_le(n as u32);
        } else {
            self.put_u8(0xff);
            self.put_u64_le(n);
        }
    }

    fn put_var_bytes(&mut self, data: &[u8]) {
        self.put_varint(data.len() as u64);
        self.put_slice(data);
    }

    fn put_var_str(&mut self, s: &str) {
        self.put_var_bytes(s.as_bytes());
    }

    fn put_hash(&mut self, hash: &Hash256) {
        self.put_slice(hash.as_bytes());
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

/// Encoded size of a CompactSize integer.
pub fn varint_size(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Encoded size of a length-prefixed byte string.
pub fn var_bytes_size(len: usize) -> usize {
    varint_size(len as u64) + len
}
