use crate::signature;
use crate::types::{ObjectPath, Signature};

use byteorder::{ByteOrder, LE};

use std::mem::size_of;
use std::str::from_utf8;

/// One basic wire type: its type code, alignment, and little-endian
/// encoding at an already-aligned position. `decode` returns the value
/// and the position past it, or `None` on malformed/short data.
pub(crate) trait DbusBasic: Sized {
    fn code() -> u8;
    fn alignment() -> usize;
    fn validate(&self) -> bool {
        true
    }
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)>;
}

macro_rules! fixed_basic {
    ($type:ident, $sig:expr, $read:ident) => {
        impl DbusBasic for $type {
            fn code() -> u8 {
                $sig as u8
            }

            fn alignment() -> usize {
                size_of::<$type>()
            }

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
                let end = pos + size_of::<$type>();
                let bytes = data.get(pos..end)?;
                Some((LE::$read(bytes), end))
            }
        }
    };
}

fixed_basic!(f64, 'd', read_f64);
fixed_basic!(i16, 'n', read_i16);
fixed_basic!(u16, 'q', read_u16);
fixed_basic!(i32, 'i', read_i32);
fixed_basic!(u32, 'u', read_u32);
fixed_basic!(i64, 'x', read_i64);
fixed_basic!(u64, 't', read_u64);

impl DbusBasic for u8 {
    fn code() -> u8 {
        b'y'
    }

    fn alignment() -> usize {
        1
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
        Some((*data.get(pos)?, pos + 1))
    }
}

// Booleans are marshaled as a 32-bit 0/1.
impl DbusBasic for bool {
    fn code() -> u8 {
        b'b'
    }

    fn alignment() -> usize {
        4
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(*self as u32).to_le_bytes());
    }

    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
        let (word, end) = u32::decode(data, pos)?;
        match word {
            0 => Some((false, end)),
            1 => Some((true, end)),
            _ => None,
        }
    }
}

fn encode_long_string(s: &str, out: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out.push(0u8);
}

fn decode_long_string(data: &[u8], pos: usize) -> Option<(String, usize)> {
    let (len, body_start) = u32::decode(data, pos)?;
    let end = body_start + len as usize;
    let bytes = data.get(body_start..end)?;
    if data.get(end) != Some(&0u8) {
        return None;
    }
    Some((from_utf8(bytes).ok()?.to_owned(), end + 1))
}

impl DbusBasic for String {
    fn code() -> u8 {
        b's'
    }

    fn alignment() -> usize {
        4
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_long_string(self, out);
    }

    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
        decode_long_string(data, pos)
    }
}

impl DbusBasic for ObjectPath {
    fn code() -> u8 {
        b'o'
    }

    fn alignment() -> usize {
        4
    }

    fn validate(&self) -> bool {
        signature::is_valid_object_path(&self.0)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_long_string(&self.0, out);
    }

    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
        let (s, end) = decode_long_string(data, pos)?;
        if !signature::is_valid_object_path(&s) {
            return None;
        }
        Some((ObjectPath(s), end))
    }
}

// Signatures use a one-byte length prefix, unlike 's' and 'o'.
impl DbusBasic for Signature {
    fn code() -> u8 {
        b'g'
    }

    fn alignment() -> usize {
        1
    }

    fn validate(&self) -> bool {
        signature::is_valid(&self.0)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let bytes = self.0.as_bytes();
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
        out.push(0u8);
    }

    fn decode(data: &[u8], pos: usize) -> Option<(Self, usize)> {
        let len = *data.get(pos)? as usize;
        let body_start = pos + 1;
        let end = body_start + len;
        let bytes = data.get(body_start..end)?;
        if data.get(end) != Some(&0u8) {
            return None;
        }
        let s = from_utf8(bytes).ok()?;
        if !signature::is_valid(s) {
            return None;
        }
        Some((Signature(s.to_owned()), end + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_round_trip() {
        let mut out = Vec::new();
        42i32.encode(&mut out);
        assert_eq!(out, vec![42, 0, 0, 0]);
        assert_eq!(i32::decode(&out, 0), Some((42, 4)));

        let mut out = Vec::new();
        true.encode(&mut out);
        assert_eq!(out, vec![1, 0, 0, 0]);
        assert_eq!(bool::decode(&out, 0), Some((true, 4)));
        assert_eq!(bool::decode(&[7, 0, 0, 0], 0), None);
    }

    #[test]
    fn string_layout() {
        let mut out = Vec::new();
        "Hi".to_owned().encode(&mut out);
        assert_eq!(out, vec![2, 0, 0, 0, 72, 105, 0]);
        assert_eq!(String::decode(&out, 0), Some(("Hi".to_owned(), 7)));
        // Missing terminating null.
        assert_eq!(String::decode(&out[..6], 0), None);
    }

    #[test]
    fn signature_layout() {
        let mut out = Vec::new();
        Signature("ai".to_owned()).encode(&mut out);
        assert_eq!(out, vec![2, 97, 105, 0]);
        let (sig, end) = Signature::decode(&out, 0).unwrap();
        assert_eq!(sig.0, "ai");
        assert_eq!(end, 4);
    }

    #[test]
    fn object_path_validation() {
        assert!(ObjectPath("/org/example".to_owned()).validate());
        assert!(!ObjectPath("org/example".to_owned()).validate());
    }
}
