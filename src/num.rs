//! Variable-width integer codec.
//!
//! Compressed ints and longs are written as one width-selector byte followed
//! by the minimal-width big-endian payload. Selector 0 is a sentinel carrying
//! `i32::MIN` (or `i64::MIN`) with no payload, so the most negative value
//! never pays for a full-width encoding and the selector space stays dense.
//!
//! When number compression is disabled for the active type the raw fixed
//! big-endian width is written instead, with no selector.

use crate::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Selector: the value is `i32::MIN` / `i64::MIN`; no payload follows.
pub const SEL_MIN: u8 = 0;
/// Selector: the value fits a signed byte.
pub const SEL_I8: u8 = 1;
/// Selector: the value fits a signed short.
pub const SEL_I16: u8 = 2;
/// Selector: full 4-byte payload.
pub const SEL_I32: u8 = 3;
/// Selector: full 8-byte payload (longs only).
pub const SEL_I64: u8 = 4;

/// Writes a fixed-width big-endian int.
pub fn write_i32_raw(out: &mut BytesMut, v: i32) {
    out.put_i32(v);
}

/// Writes a fixed-width big-endian long.
pub fn write_i64_raw(out: &mut BytesMut, v: i64) {
    out.put_i64(v);
}

/// Writes an int as selector byte plus minimal-width payload.
pub fn write_i32(out: &mut BytesMut, v: i32) {
    if v == i32::MIN {
        out.put_u8(SEL_MIN);
    } else if (-128..=127).contains(&v) {
        out.put_u8(SEL_I8);
        out.put_i8(v as i8);
    } else if (-32768..=32767).contains(&v) {
        out.put_u8(SEL_I16);
        out.put_i16(v as i16);
    } else {
        out.put_u8(SEL_I32);
        out.put_i32(v);
    }
}

/// Writes a long as selector byte plus minimal-width payload.
pub fn write_i64(out: &mut BytesMut, v: i64) {
    if v == i64::MIN {
        out.put_u8(SEL_MIN);
    } else if (-128..=127).contains(&v) {
        out.put_u8(SEL_I8);
        out.put_i8(v as i8);
    } else if (-32768..=32767).contains(&v) {
        out.put_u8(SEL_I16);
        out.put_i16(v as i16);
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        out.put_u8(SEL_I32);
        out.put_i32(v as i32);
    } else {
        out.put_u8(SEL_I64);
        out.put_i64(v);
    }
}

/// Reads a fixed-width big-endian int.
pub fn read_i32_raw(input: &mut Bytes) -> Result<i32> {
    need(input, 4, "raw int")?;
    Ok(input.get_i32())
}

/// Reads a fixed-width big-endian long.
pub fn read_i64_raw(input: &mut Bytes) -> Result<i64> {
    need(input, 8, "raw long")?;
    Ok(input.get_i64())
}

/// Reads a selector-compressed int.
pub fn read_i32(input: &mut Bytes) -> Result<i32> {
    need(input, 1, "int selector")?;
    match input.get_u8() {
        SEL_MIN => Ok(i32::MIN),
        SEL_I8 => {
            need(input, 1, "int payload")?;
            Ok(input.get_i8() as i32)
        }
        SEL_I16 => {
            need(input, 2, "int payload")?;
            Ok(input.get_i16() as i32)
        }
        SEL_I32 => {
            need(input, 4, "int payload")?;
            Ok(input.get_i32())
        }
        other => Err(CodecError::Corrupt(format!("unexpected int width selector {other}"))),
    }
}

/// Reads a selector-compressed long.
pub fn read_i64(input: &mut Bytes) -> Result<i64> {
    need(input, 1, "long selector")?;
    match input.get_u8() {
        SEL_MIN => Ok(i64::MIN),
        SEL_I8 => {
            need(input, 1, "long payload")?;
            Ok(input.get_i8() as i64)
        }
        SEL_I16 => {
            need(input, 2, "long payload")?;
            Ok(input.get_i16() as i64)
        }
        SEL_I32 => {
            need(input, 4, "long payload")?;
            Ok(input.get_i32() as i64)
        }
        SEL_I64 => {
            need(input, 8, "long payload")?;
            Ok(input.get_i64())
        }
        other => Err(CodecError::Corrupt(format!("unexpected long width selector {other}"))),
    }
}

/// Writes a reference id. Ids are always selector-compressed.
pub fn write_id(out: &mut BytesMut, id: u32) {
    write_i32(out, id as i32);
}

/// Reads a reference id, rejecting the never-valid id 0.
pub fn read_id(input: &mut Bytes) -> Result<u32> {
    let raw = read_i32(input)?;
    if raw <= 0 {
        return Err(CodecError::Corrupt(format!("reference id {raw} out of range")));
    }
    Ok(raw as u32)
}

/// Fails with `Truncated` when fewer than `n` bytes remain.
pub fn need(input: &Bytes, n: usize, what: &'static str) -> Result<()> {
    if input.remaining() < n {
        return Err(CodecError::Truncated(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_i32(v: i32) -> (i32, usize) {
        let mut out = BytesMut::new();
        write_i32(&mut out, v);
        let len = out.len();
        let mut input = out.freeze();
        (read_i32(&mut input).unwrap(), len)
    }

    fn roundtrip_i64(v: i64) -> (i64, usize) {
        let mut out = BytesMut::new();
        write_i64(&mut out, v);
        let len = out.len();
        let mut input = out.freeze();
        (read_i64(&mut input).unwrap(), len)
    }

    #[test]
    fn int_width_boundaries() {
        for (v, want_len) in [
            (0, 2),
            (127, 2),
            (128, 3),
            (-128, 2),
            (-129, 3),
            (32767, 3),
            (32768, 5),
            (-32768, 3),
            (-32769, 5),
            (i32::MAX, 5),
            (i32::MIN + 1, 5),
            (i32::MIN, 1),
        ] {
            let (back, len) = roundtrip_i32(v);
            assert_eq!(back, v);
            assert_eq!(len, want_len, "width for {v}");
        }
    }

    #[test]
    fn long_width_boundaries() {
        for (v, want_len) in [
            (0i64, 2),
            (-129, 3),
            (32768, 5),
            (i32::MAX as i64, 5),
            (i32::MAX as i64 + 1, 9),
            (i32::MIN as i64, 5),
            (i32::MIN as i64 - 1, 9),
            (i64::MAX, 9),
            (i64::MIN + 1, 9),
            (i64::MIN, 1),
        ] {
            let (back, len) = roundtrip_i64(v);
            assert_eq!(back, v);
            assert_eq!(len, want_len, "width for {v}");
        }
    }

    #[test]
    fn raw_forms_are_fixed_width() {
        let mut out = BytesMut::new();
        write_i32_raw(&mut out, 5);
        write_i64_raw(&mut out, 5);
        assert_eq!(out.len(), 12);
        let mut input = out.freeze();
        assert_eq!(read_i32_raw(&mut input).unwrap(), 5);
        assert_eq!(read_i64_raw(&mut input).unwrap(), 5);
    }

    #[test]
    fn bad_selector_is_corrupt() {
        let mut input = Bytes::from_static(&[9]);
        assert!(matches!(read_i32(&mut input), Err(crate::CodecError::Corrupt(_))));
    }

    #[test]
    fn truncated_payload() {
        let mut input = Bytes::from_static(&[SEL_I32, 0, 0]);
        assert!(matches!(read_i32(&mut input), Err(crate::CodecError::Truncated(_))));
    }
}
