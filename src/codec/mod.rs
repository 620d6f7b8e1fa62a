//! Type codec: primitive value <-> Modbus register byte encoding.
//!
//! Swap order is fixed per the design: byte swap, then word swap on encode;
//! word swap undone, then byte swap undone on decode. Both transforms are
//! self-inverse so the two directions share `apply_swaps`.

use byteorder::{BigEndian, ByteOrder};
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};

/// Declared Modbus datatype for a tag, per the configuration schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
    Bool,
    String,
}

impl DataType {
    /// Fixed register count for every datatype except `string`, whose
    /// register count is the tag's declared `length`.
    pub fn register_count(self) -> Option<u16> {
        match self {
            DataType::Int16 | DataType::Uint16 | DataType::Bool => Some(1),
            DataType::Int32 | DataType::Uint32 | DataType::Float => Some(2),
            DataType::Double => Some(4),
            DataType::String => None,
        }
    }
}

/// A decoded primitive tag value. `Error` is the cache's `"ERR"` sentinel,
/// kept out of this enum: callers represent read failure separately (see
/// `tags::cache::TagPayload`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
}

impl Value {
    pub fn datatype(&self) -> DataType {
        match self {
            Value::Int16(_) => DataType::Int16,
            Value::Uint16(_) => DataType::Uint16,
            Value::Int32(_) => DataType::Int32,
            Value::Uint32(_) => DataType::Uint32,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Bool(_) => DataType::Bool,
            Value::String(_) => DataType::String,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int16(v) => *v != 0,
            Value::Uint16(v) => *v != 0,
            Value::Int32(v) => *v != 0,
            Value::Uint32(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Double(v) => *v != 0.0,
            Value::String(s) => !s.is_empty() && s != "0" && s.to_lowercase() != "false",
        }
    }
}

/// Byte-swap within every 2-byte register, then (if the buffer is at least
/// 4 bytes) reverse the register order. Self-inverse: calling this twice
/// with the same flags on its own output restores the original bytes.
pub fn apply_swaps(mut data: Vec<u8>, byte_swap: bool, word_swap: bool) -> Vec<u8> {
    if byte_swap {
        let mut i = 0;
        while i + 1 < data.len() {
            data.swap(i, i + 1);
            i += 2;
        }
    }
    if word_swap && data.len() >= 4 {
        let words: Vec<[u8; 2]> = data.chunks(2).map(|c| [c[0], c[1]]).collect();
        data = words.into_iter().rev().flatten().collect();
    }
    data
}

/// Split a big-endian byte buffer into 16-bit registers.
pub fn registers_of(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks(2).map(BigEndian::read_u16).collect()
}

/// Inverse of `registers_of`: concatenate registers back into big-endian bytes.
pub fn bytes_of(registers: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(registers.len() * 2);
    for r in registers {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, *r);
        out.extend_from_slice(&buf);
    }
    out
}

/// Pack `value` big-endian per the type table, applying byte swap then word
/// swap. `string_length` is the register count for `DataType::String` and
/// is ignored for every other datatype.
pub fn encode(
    value: &Value,
    byte_swap: bool,
    word_swap: bool,
    string_length: Option<u16>,
) -> GatewayResult<Vec<u8>> {
    let raw: Vec<u8> = match value {
        Value::Int16(v) => {
            let mut b = [0u8; 2];
            BigEndian::write_i16(&mut b, *v);
            b.to_vec()
        }
        Value::Uint16(v) => {
            let mut b = [0u8; 2];
            BigEndian::write_u16(&mut b, *v);
            b.to_vec()
        }
        Value::Int32(v) => {
            let mut b = [0u8; 4];
            BigEndian::write_i32(&mut b, *v);
            b.to_vec()
        }
        Value::Uint32(v) => {
            let mut b = [0u8; 4];
            BigEndian::write_u32(&mut b, *v);
            b.to_vec()
        }
        Value::Float(v) => {
            let mut b = [0u8; 4];
            BigEndian::write_f32(&mut b, *v);
            b.to_vec()
        }
        Value::Double(v) => {
            let mut b = [0u8; 8];
            BigEndian::write_f64(&mut b, *v);
            b.to_vec()
        }
        Value::Bool(v) => vec![0, if *v { 1 } else { 0 }],
        Value::String(s) => {
            let length = string_length
                .ok_or_else(|| GatewayError::Decode("string encode requires a length".into()))?;
            let cap = (length as usize) * 2;
            let mut raw = s.as_bytes().to_vec();
            raw.truncate(cap);
            raw.resize(cap, 0);
            raw
        }
    };
    Ok(apply_swaps(raw, byte_swap, word_swap))
}

/// Inverse of `encode`. Swaps are undone in the same fixed order: byte swap
/// precedes word swap on encode, so decode must unwind them in the same
/// order since both transforms are self-inverse and order-sensitive when
/// composed.
pub fn decode(
    bytes: &[u8],
    datatype: DataType,
    byte_swap: bool,
    word_swap: bool,
) -> GatewayResult<Value> {
    let data = apply_swaps(bytes.to_vec(), byte_swap, word_swap);
    match datatype {
        DataType::Int16 => expect_len(&data, 2).map(|d| Value::Int16(BigEndian::read_i16(d))),
        DataType::Uint16 => expect_len(&data, 2).map(|d| Value::Uint16(BigEndian::read_u16(d))),
        DataType::Int32 => expect_len(&data, 4).map(|d| Value::Int32(BigEndian::read_i32(d))),
        DataType::Uint32 => expect_len(&data, 4).map(|d| Value::Uint32(BigEndian::read_u32(d))),
        DataType::Float => expect_len(&data, 4).map(|d| Value::Float(BigEndian::read_f32(d))),
        DataType::Double => expect_len(&data, 8).map(|d| Value::Double(BigEndian::read_f64(d))),
        DataType::Bool => expect_len(&data, 2).map(|d| Value::Bool(d[1] != 0 || d[0] != 0)),
        DataType::String => Ok(Value::String(
            decode_utf8_dropping_invalid(&data)
                .trim_end_matches('\u{0}')
                .to_string(),
        )),
    }
}

/// Decode `bytes` as UTF-8, dropping invalid sequences instead of
/// substituting the replacement character (unlike `String::from_utf8_lossy`).
fn decode_utf8_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                out.push_str(std::str::from_utf8(&bytes[..valid_up_to]).unwrap());
                let invalid_len = e.error_len().unwrap_or(bytes.len() - valid_up_to);
                bytes = &bytes[valid_up_to + invalid_len.max(1)..];
            }
        }
    }
    out
}

fn expect_len(data: &[u8], len: usize) -> GatewayResult<&[u8]> {
    if data.len() < len {
        return Err(GatewayError::Decode(format!(
            "expected at least {len} bytes, got {}",
            data.len()
        )));
    }
    Ok(&data[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value, byte_swap: bool, word_swap: bool) {
        let datatype = value.datatype();
        let encoded = encode(&value, byte_swap, word_swap, Some(4)).unwrap();
        let decoded = decode(&encoded, datatype, byte_swap, word_swap).unwrap();
        assert_eq!(decoded, value, "round trip failed for {datatype:?} bs={byte_swap} ws={word_swap}");
    }

    #[test]
    fn round_trip_every_numeric_type_and_swap_combo() {
        let values = vec![
            Value::Int16(-1234),
            Value::Uint16(54321),
            Value::Int32(-123_456),
            Value::Uint32(3_000_000_000),
            Value::Float(3.14),
            Value::Double(2.718281828),
            Value::Bool(true),
            Value::Bool(false),
        ];
        for value in values {
            for byte_swap in [false, true] {
                for word_swap in [false, true] {
                    round_trip(value.clone(), byte_swap, word_swap);
                }
            }
        }
    }

    #[test]
    fn string_padding_is_exactly_2l_bytes() {
        let encoded = encode(&Value::String("hi".into()), false, false, Some(4)).unwrap();
        assert_eq!(encoded.len(), 8);
        assert_eq!(&encoded[..2], b"hi");
        assert!(encoded[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn string_longer_than_capacity_is_truncated() {
        let encoded = encode(&Value::String("abcdefgh".into()), false, false, Some(2)).unwrap();
        assert_eq!(encoded.len(), 4);
        assert_eq!(&encoded, b"abcd");
    }

    #[test]
    fn string_decode_strips_trailing_nuls() {
        let mut bytes = b"hi".to_vec();
        bytes.extend_from_slice(&[0, 0]);
        let decoded = decode(&bytes, DataType::String, false, false).unwrap();
        assert_eq!(decoded, Value::String("hi".into()));
    }

    #[test]
    fn string_decode_drops_invalid_utf8_instead_of_substituting() {
        let mut bytes = b"hi".to_vec();
        bytes.push(0xFF); // not a valid UTF-8 lead byte
        bytes.extend_from_slice(b"there");
        let decoded = decode(&bytes, DataType::String, false, false).unwrap();
        assert_eq!(decoded, Value::String("hithere".into()));
    }

    #[test]
    fn scenario_s1_holding_float_no_swaps() {
        // Device returns registers [0x4048, 0xF5C3] -> 3.14 big-endian float.
        let bytes = bytes_of(&[0x4048, 0xF5C3]);
        let decoded = decode(&bytes, DataType::Float, false, false).unwrap();
        match decoded {
            Value::Float(f) => assert!((f - 3.14).abs() < 1e-6),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn scenario_s2_holding_float_byte_and_word_swap() {
        // Device returns registers [0xC3F5, 0x4840] with byte_swap=word_swap=true -> 3.14.
        let bytes = bytes_of(&[0xC3F5, 0x4840]);
        let decoded = decode(&bytes, DataType::Float, true, true).unwrap();
        match decoded {
            Value::Float(f) => assert!((f - 3.14).abs() < 1e-6),
            other => panic!("expected float, got {other:?}"),
        }
        // Re-encoding with the same flags must reproduce the original wire registers.
        let encoded = encode(&decoded, true, true, None).unwrap();
        assert_eq!(registers_of(&encoded), vec![0xC3F5, 0x4840]);
    }

    #[test]
    fn word_swap_only_applies_to_buffers_of_at_least_4_bytes() {
        let data = vec![0x01, 0x02];
        let swapped = apply_swaps(data.clone(), false, true);
        assert_eq!(swapped, data);
    }
}
