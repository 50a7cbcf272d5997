//! Variable-length integers shared by the BPS, BPM and BPA containers.
//!
//! Bijective base-128, least significant group first. Every non-terminal
//! byte has bit 7 clear; the terminal byte has it set. Subtracting one after
//! each non-terminal group makes every value's encoding unique and minimal.

use crate::error::{PatchError, Result};

/// Longest encoding of a `u64` (ceil(64 / 7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// Append the encoding of `value` to `out`.
pub fn write(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(0x80 | group);
            break;
        }
        out.push(group);
        value -= 1;
    }
}

/// Append a signed relative offset: magnitude shifted left, sign in bit 0.
pub fn write_signed(out: &mut Vec<u8>, value: i64) {
    let negative = u64::from(value < 0);
    write(out, (value.unsigned_abs() << 1) | negative);
}

/// Number of bytes [`write`] emits for `value`.
pub fn encoded_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value = (value >> 7) - 1;
        len += 1;
    }
    len
}

/// Number of bytes [`write_signed`] emits for `value`.
pub fn signed_len(value: i64) -> usize {
    encoded_len((value.unsigned_abs() << 1) | u64::from(value < 0))
}

/// Decode one varint from the front of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u64 = 1;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = u64::from(byte & 0x7f)
            .checked_mul(shift)
            .ok_or(PatchError::MalformedVarint)?;
        value = value
            .checked_add(group)
            .ok_or(PatchError::MalformedVarint)?;
        if byte & 0x80 != 0 {
            return Ok((value, i + 1));
        }
        shift = shift.checked_mul(0x80).ok_or(PatchError::MalformedVarint)?;
        value = value
            .checked_add(shift)
            .ok_or(PatchError::MalformedVarint)?;
    }
    Err(PatchError::MalformedVarint)
}

/// Forward-only cursor over an in-memory container.
///
/// Reads past the end surface as `OutOfBounds`, except inside a varint,
/// where a missing terminal byte is `MalformedVarint`.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or(PatchError::OutOfBounds)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(PatchError::OutOfBounds);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, used) = read(&self.data[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    /// A varint that must fit the address space of this platform.
    pub fn read_len(&mut self) -> Result<usize> {
        usize::try_from(self.read_varint()?).map_err(|_| PatchError::MalformedVarint)
    }

    pub fn read_signed(&mut self) -> Result<i64> {
        let raw = self.read_varint()?;
        let magnitude = (raw >> 1) as i64;
        Ok(if raw & 1 != 0 { -magnitude } else { magnitude })
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
