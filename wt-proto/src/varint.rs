//! QUIC variable-length integers (RFC 9000 §16).
//!
//! The two high bits of the first byte select a 1, 2, 4 or 8 byte
//! encoding carrying 6, 14, 30 or 62 bits of value.

use crate::error::{Error, Result};

/// Largest value a varint can carry.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Number of bytes `v` occupies on the wire.
pub const fn varint_len(v: u64) -> usize {
    if v <= 0x3f {
        1
    } else if v <= 0x3fff {
        2
    } else if v <= 0x3fff_ffff {
        4
    } else {
        8
    }
}

/// Append `v` to `buf`, returning the number of bytes written.
pub fn write(v: u64, buf: &mut Vec<u8>) -> Result<usize> {
    if v > MAX_VARINT {
        return Err(Error::VarintOverflow);
    }
    let len = varint_len(v);
    let tag: u64 = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        _ => 0xc0,
    };
    let shift = (len - 1) * 8;
    buf.push(((tag << shift | v) >> shift) as u8);
    for i in (0..len - 1).rev() {
        buf.push((v >> (i * 8)) as u8);
    }
    Ok(len)
}

/// Encode `v` into a fresh buffer.
pub fn to_vec(v: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(varint_len(v));
    write(v, &mut buf)?;
    Ok(buf)
}

/// Decode a varint from the front of `buf`, returning `(value, consumed)`.
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    let first = *buf.first().ok_or(Error::BufferTooShort)?;
    let len = 1usize << (first >> 6);
    if buf.len() < len {
        return Err(Error::BufferTooShort);
    }
    let v = buf[1..len]
        .iter()
        .fold(u64::from(first & 0x3f), |acc, &b| (acc << 8) | u64::from(b));
    Ok((v, len))
}

/// Byte-at-a-time varint decoder for prefixes that may straddle reads.
#[derive(Debug, Clone, Default)]
pub struct VarintDecoder {
    value: u64,
    expected_len: usize,
    consumed: usize,
}

impl VarintDecoder {
    pub const fn new() -> Self {
        Self {
            value: 0,
            expected_len: 0,
            consumed: 0,
        }
    }

    /// Feed one byte. Yields the value once the final byte arrives.
    pub fn feed(&mut self, byte: u8) -> Option<u64> {
        if self.consumed == 0 {
            self.expected_len = 1usize << (byte >> 6);
            self.value = u64::from(byte & 0x3f);
        } else {
            self.value = (self.value << 8) | u64::from(byte);
        }
        self.consumed += 1;
        (self.consumed == self.expected_len).then_some(self.value)
    }
}
