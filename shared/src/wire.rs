//! Primitive encodings shared by every message payload
//!
//! - Fixed-width big-endian integers, longs and doubles
//! - Base-128 variable-length integers, 7 bits per byte, at most 5 bytes
//! - Strings as varint byte length followed by UTF-8 bytes
//! - Property maps as a varint entry count followed by key/value strings
//! - UUIDs as two big-endian 64-bit halves

use crate::error::{ProtocolError, Result};
use crate::{MAX_PROPERTY_COUNT, MAX_PROPERTY_VALUE_SIZE};
use bytes::{Buf, BufMut};
use std::collections::HashMap;
use uuid::Uuid;

pub const MAX_VAR_INT_BYTES: usize = 5;

pub fn put_var_int(buf: &mut impl BufMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_var_int(buf: &mut impl Buf) -> Result<u32> {
    let mut value: u64 = 0;
    for position in 0..MAX_VAR_INT_BYTES {
        ensure(buf, 1, "varint")?;
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << (7 * position);
        if byte & 0x80 == 0 {
            return u32::try_from(value).map_err(|_| ProtocolError::VarIntTooBig);
        }
    }
    Err(ProtocolError::VarIntTooBig)
}

pub fn var_int_size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

pub fn put_string(buf: &mut impl BufMut, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_PROPERTY_VALUE_SIZE {
        return Err(ProtocolError::StringTooLong {
            length: bytes.len(),
            max: MAX_PROPERTY_VALUE_SIZE,
        });
    }
    put_var_int(buf, bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(())
}

pub fn get_string(buf: &mut impl Buf) -> Result<String> {
    let length = get_var_int(buf)? as usize;
    if length > MAX_PROPERTY_VALUE_SIZE {
        return Err(ProtocolError::StringTooLong {
            length,
            max: MAX_PROPERTY_VALUE_SIZE,
        });
    }
    ensure(buf, length, "string")?;
    let mut bytes = vec![0u8; length];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8(bytes)?)
}

pub fn put_property_map(buf: &mut impl BufMut, map: &HashMap<String, String>) -> Result<()> {
    if map.len() > MAX_PROPERTY_COUNT {
        return Err(ProtocolError::PropertyMapTooLarge {
            count: map.len(),
            max: MAX_PROPERTY_COUNT,
        });
    }
    put_var_int(buf, map.len() as u32);
    for (key, value) in map {
        put_string(buf, key)?;
        put_string(buf, value)?;
    }
    Ok(())
}

pub fn get_property_map(buf: &mut impl Buf) -> Result<HashMap<String, String>> {
    let count = get_var_int(buf)? as usize;
    if count > MAX_PROPERTY_COUNT {
        return Err(ProtocolError::PropertyMapTooLarge {
            count,
            max: MAX_PROPERTY_COUNT,
        });
    }
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = get_string(buf)?;
        let value = get_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

pub fn put_uuid(buf: &mut impl BufMut, id: &Uuid) {
    let (msb, lsb) = id.as_u64_pair();
    buf.put_u64(msb);
    buf.put_u64(lsb);
}

pub fn get_uuid(buf: &mut impl Buf) -> Result<Uuid> {
    ensure(buf, 16, "uuid")?;
    let msb = buf.get_u64();
    let lsb = buf.get_u64();
    Ok(Uuid::from_u64_pair(msb, lsb))
}

pub fn put_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn get_bool(buf: &mut impl Buf) -> Result<bool> {
    ensure(buf, 1, "bool")?;
    Ok(buf.get_u8() != 0)
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn get_i32(buf: &mut impl Buf) -> Result<i32> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_i32())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_u32())
}

pub fn get_i64(buf: &mut impl Buf) -> Result<i64> {
    ensure(buf, 8, "long")?;
    Ok(buf.get_i64())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64> {
    ensure(buf, 8, "long")?;
    Ok(buf.get_u64())
}

pub fn get_f64(buf: &mut impl Buf) -> Result<f64> {
    ensure(buf, 8, "double")?;
    Ok(buf.get_f64())
}

/// Reads a fixed-width element count, rejecting negative values and counts
/// that could not possibly fit in the remaining bytes.
pub fn get_count(buf: &mut impl Buf, what: &'static str) -> Result<usize> {
    let count = get_i32(buf)?;
    if count < 0 {
        return Err(ProtocolError::NegativeLength {
            what,
            length: count,
        });
    }
    let count = count as usize;
    ensure(buf, count, what)?;
    Ok(count)
}

/// Reads an `i32` length prefix followed by that many raw bytes.
pub fn get_byte_array(buf: &mut impl Buf, what: &'static str) -> Result<Vec<u8>> {
    let length = get_count(buf, what)?;
    let mut bytes = vec![0u8; length];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn put_byte_array(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.put_slice(bytes);
}

fn ensure(buf: &impl Buf, needed: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::UnexpectedEof {
            what,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
