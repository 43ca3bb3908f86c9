//! # Stop-Bit Size Encoding
//!
//! Variable-length encoding for the key-size and value-size prefixes stored
//! at the head of every entry. Each byte carries seven value bits,
//! least-significant group first; the high bit is a continuation flag, so
//! the encoding stops at the first byte with bit 7 clear:
//!
//! | Value Range             | Bytes |
//! |-------------------------|-------|
//! | 0 - 127                 | 1     |
//! | 128 - 16383             | 2     |
//! | 16384 - 2097151         | 3     |
//! | ...                     | ...   |
//! | 2^63 - u64::MAX         | 10    |
//!
//! Sizes are overwhelmingly small (a key or value rarely exceeds a hundred
//! bytes), so the common case costs one byte. The tenth byte, when present,
//! may only contribute the top bit of the value; anything larger is rejected
//! as an overflow rather than silently wrapped.
//!
//! The encoded length of a size prefix is part of an entry's block
//! footprint, so `varint_len` must agree exactly with `encode_varint` for
//! every value; the allocator computes footprints from `varint_len` before
//! any byte is written.
//!
//! All functions operate on byte slices, perform no allocation, and are
//! stateless. `decode_varint` returns `eyre::Result` with descriptive
//! messages for truncated or malformed input.

use eyre::{bail, ensure, Result};

pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn encode_varint(mut value: u64, buf: &mut [u8]) -> usize {
    let mut written = 0;
    while value >= 0x80 {
        buf[written] = (value as u8 & 0x7F) | 0x80;
        value >>= 7;
        written += 1;
    }
    buf[written] = value as u8;
    written + 1
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "cannot decode a size from an empty buffer");

    let mut value = 0u64;
    let mut shift = 0u32;
    for (read, &byte) in buf.iter().enumerate() {
        ensure!(shift < 64, "stop-bit encoding runs past 10 bytes");
        let group = (byte & 0x7F) as u64;
        // The tenth byte holds only the top bit of a u64.
        ensure!(
            shift < 63 || group <= 1,
            "stop-bit encoding overflows 64 bits"
        );
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((value, read + 1));
        }
        shift += 7;
    }
    bail!("truncated stop-bit encoding: continuation flag set at end of buffer")
}
