//! Modified-UTF8 string codec.
//!
//! Strings travel as modified UTF-8 over their UTF-16 code units: U+0001 to
//! U+007F take one byte, U+0000 and everything up to U+07FF take two, the
//! rest of the basic plane takes three, and supplementary-plane characters
//! are written as a surrogate pair (six bytes). Lengths are measured in these
//! modified-UTF8 bytes, not characters.
//!
//! Two wire forms share a one-byte discriminator: the short form carries a
//! two-byte length and covers payloads up to 0xFFFF bytes; the long form
//! carries a raw four-byte length.

use crate::num::{need, read_i32_raw, write_i32_raw};
use crate::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Discriminator for the short form (u16 length prefix).
pub const STR_SHORT: u8 = 1;
/// Discriminator for the long form (raw i32 length prefix).
pub const STR_LONG: u8 = 2;

/// Length of `s` in modified-UTF8 bytes.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|u| match u {
            0x0001..=0x007F => 1,
            u if u > 0x07FF => 3,
            _ => 2,
        })
        .sum()
}

fn put_mutf8(out: &mut BytesMut, s: &str) {
    for u in s.encode_utf16() {
        match u {
            0x0001..=0x007F => out.put_u8(u as u8),
            u if u > 0x07FF => {
                out.put_u8(0xE0 | (u >> 12) as u8);
                out.put_u8(0x80 | ((u >> 6) & 0x3F) as u8);
                out.put_u8(0x80 | (u & 0x3F) as u8);
            }
            u => {
                out.put_u8(0xC0 | (u >> 6) as u8);
                out.put_u8(0x80 | (u & 0x3F) as u8);
            }
        }
    }
}

/// Writes a string, selecting the short or long wire form by encoded length.
pub fn write_string(out: &mut BytesMut, s: &str) {
    let len = encoded_len(s);
    if len <= 0xFFFF {
        out.put_u8(STR_SHORT);
        out.put_u16(len as u16);
    } else {
        out.put_u8(STR_LONG);
        write_i32_raw(out, len as i32);
    }
    put_mutf8(out, s);
}

/// Reads a string written by [`write_string`].
pub fn read_string(input: &mut Bytes) -> Result<String> {
    need(input, 1, "string discriminator")?;
    let len = match input.get_u8() {
        STR_SHORT => {
            need(input, 2, "string length")?;
            input.get_u16() as usize
        }
        STR_LONG => {
            let raw = read_i32_raw(input)?;
            if raw < 0 {
                return Err(CodecError::Corrupt(format!("negative string length {raw}")));
            }
            raw as usize
        }
        other => {
            return Err(CodecError::Corrupt(format!("unexpected string discriminator {other}")))
        }
    };
    need(input, len, "string payload")?;
    let bytes = input.copy_to_bytes(len);
    decode_mutf8(&bytes)
}

fn decode_mutf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = match b {
            0x01..=0x7F => {
                i += 1;
                b as u16
            }
            0xC0..=0xDF => {
                if i + 1 >= bytes.len() {
                    return Err(CodecError::Truncated("modified-UTF8 sequence"));
                }
                let b2 = bytes[i + 1];
                if b2 & 0xC0 != 0x80 {
                    return Err(CodecError::Corrupt("malformed modified-UTF8 continuation".into()));
                }
                i += 2;
                ((b as u16 & 0x1F) << 6) | (b2 as u16 & 0x3F)
            }
            0xE0..=0xEF => {
                if i + 2 >= bytes.len() {
                    return Err(CodecError::Truncated("modified-UTF8 sequence"));
                }
                let (b2, b3) = (bytes[i + 1], bytes[i + 2]);
                if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                    return Err(CodecError::Corrupt("malformed modified-UTF8 continuation".into()));
                }
                i += 3;
                ((b as u16 & 0x0F) << 12) | ((b2 as u16 & 0x3F) << 6) | (b3 as u16 & 0x3F)
            }
            other => {
                return Err(CodecError::Corrupt(format!(
                    "malformed modified-UTF8 lead byte 0x{other:02X}"
                )))
            }
        };
        units.push(unit);
    }
    String::from_utf16(&units)
        .map_err(|_| CodecError::Corrupt("unpaired surrogate in string payload".into()))
}
