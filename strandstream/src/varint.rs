//! QUIC-style variable-length integer encoding used as the frame length
//! prefix on the wire (see `crate::assembler`).
//!
//! The top two bits of the first byte select the encoded width:
//! `00` -> 1 byte, `01` -> 2 bytes, `10` -> 4 bytes, `11` -> 8 bytes. The
//! remaining bits of the first byte, followed by any subsequent bytes,
//! big-endian, hold the value. Encoding is minimal: a value must use the
//! smallest width that can represent it.

use bytes::{Buf, BufMut};

use crate::error::{Result, StrandError};

const MASK_6: u64 = (1 << 6) - 1;
const MAX_1: u64 = (1 << 6) - 1;
const MAX_2: u64 = (1 << 14) - 1;
const MAX_4: u64 = (1 << 30) - 1;
const MAX_8: u64 = (1 << 62) - 1;

/// Number of bytes `encode` will produce for `v`.
pub fn encoded_len(v: u64) -> usize {
    if v <= MAX_1 {
        1
    } else if v <= MAX_2 {
        2
    } else if v <= MAX_4 {
        4
    } else {
        8
    }
}

/// Encode `v` as a QUIC varint into `buf`.
///
/// # Panics
///
/// Panics if `v` exceeds the 62-bit range representable by the 8-byte
/// encoding (`2^62 - 1`). Callers in this crate never pass frame lengths
/// anywhere near that range (`MAX_FRAME_SIZE` is 10 MiB), so this is an
/// invariant violation rather than a recoverable condition.
pub fn encode(v: u64, buf: &mut impl BufMut) {
    assert!(v <= MAX_8, "varint value {v} exceeds 62-bit range");
    if v <= MAX_1 {
        buf.put_u8(v as u8);
    } else if v <= MAX_2 {
        buf.put_u16(0x4000 | v as u16);
    } else if v <= MAX_4 {
        buf.put_u32(0x8000_0000 | v as u32);
    } else {
        buf.put_u64(0xC000_0000_0000_0000 | v);
    }
}

/// Convenience wrapper returning a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec(v: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(v));
    encode(v, &mut out);
    out
}

/// Result of a streaming varint decode attempt.
pub enum Decoded {
    /// Not enough bytes were available yet; `need` more bytes are required
    /// before decoding can be retried (only known once the first byte, which
    /// carries the length class, has been seen).
    Incomplete { need: usize },
    /// Decoded `value`, having consumed `consumed` bytes from the front of
    /// the input.
    Complete { value: u64, consumed: usize },
}

/// Attempt to decode a varint from the front of `data`.
///
/// This is the streaming-friendly entry point used by the assembler, which
/// may see a length prefix split across multiple transport reads.
pub fn decode_prefix(data: &[u8]) -> Result<Decoded> {
    let Some(&first) = data.first() else {
        return Ok(Decoded::Incomplete { need: 1 });
    };
    let len = 1usize << (first >> 6);
    if data.len() < len {
        return Ok(Decoded::Incomplete { need: len - data.len() });
    }

    let mut slice = &data[..len];
    let value = match len {
        1 => (first & MASK_6 as u8) as u64,
        2 => (slice.get_u16() & 0x3FFF) as u64,
        4 => (slice.get_u32() & 0x3FFF_FFFF) as u64,
        8 => slice.get_u64() & 0x3FFF_FFFF_FFFF_FFFF,
        _ => unreachable!("length class is always 1, 2, 4, or 8"),
    };

    if !is_minimal(value, len) {
        return Err(StrandError::VarintNotMinimal);
    }

    Ok(Decoded::Complete {
        value,
        consumed: len,
    })
}

/// Decode a complete, self-contained varint (no partial-input handling).
pub fn decode(data: &[u8]) -> Result<(u64, usize)> {
    match decode_prefix(data)? {
        Decoded::Complete { value, consumed } => Ok((value, consumed)),
        Decoded::Incomplete { .. } => Err(StrandError::VarintTruncated),
    }
}

fn is_minimal(value: u64, len: usize) -> bool {
    match len {
        1 => true,
        2 => value > MAX_1,
        4 => value > MAX_2,
        8 => value > MAX_4,
        _ => false,
    }
}
