use std::collections::BTreeMap;
use std::ops::Range;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes a bencode value from a byte slice.
///
/// The input must contain exactly one complete bencode value with no trailing
/// data. Decoding is strict: duplicate dictionary keys and non-minimal integer
/// encodings (`i03e`, `i-0e`, `i+1e`) are rejected, so a decoded value always
/// re-encodes to the original bytes.
///
/// # Errors
///
/// Returns an error if:
/// - The input is empty or truncated ([`BencodeError::UnexpectedEof`])
/// - The input contains invalid bencode syntax
/// - A dictionary contains the same key twice ([`BencodeError::DuplicateKey`])
/// - The nesting depth exceeds 64 levels ([`BencodeError::NestingTooDeep`])
/// - There is data after the value ([`BencodeError::TrailingData`])
///
/// # Examples
///
/// ```
/// use swell::bencode::decode;
///
/// let int = decode(b"i42e").unwrap();
/// assert_eq!(int.as_integer(), Some(42));
///
/// let dict = decode(b"d4:name5:stone3:agei30ee").unwrap();
/// assert_eq!(dict.get(b"name").and_then(|v| v.as_str()), Some("stone"));
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;

    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Returns the byte range of the value stored under `key` in the top-level
/// dictionary of `data`.
///
/// The range points into the original buffer, so the caller can hash or copy
/// the sub-value exactly as it appeared on the wire. This is how the torrent
/// info-hash is computed: SHA-1 over the verbatim bytes of the `info` value,
/// never over a re-encoding.
///
/// Returns `Ok(None)` if the key is not present.
///
/// # Errors
///
/// Fails if `data` is not a single well-formed bencode dictionary.
///
/// # Examples
///
/// ```
/// use swell::bencode::value_span;
///
/// let data = b"d3:fooi1e4:infod4:name1:xee";
/// let span = value_span(data, b"info").unwrap().unwrap();
/// assert_eq!(&data[span], b"d4:name1:xe");
/// ```
pub fn value_span(data: &[u8], key: &[u8]) -> Result<Option<Range<usize>>, BencodeError> {
    if data.first() != Some(&b'd') {
        return Err(BencodeError::UnexpectedChar(
            data.first().copied().unwrap_or(b'?') as char,
        ));
    }

    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let entry_key = match decode_value(data, &mut pos, 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::UnexpectedChar(data[pos] as char)),
        };

        let start = pos;
        skip_value(data, &mut pos, 1)?;

        if entry_key == key {
            return Ok(Some(start..pos));
        }
    }

    if pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    Ok(None)
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    match data[*pos] {
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        b'0'..=b'9' => decode_bytes(data, pos),
        c => Err(BencodeError::UnexpectedChar(c as char)),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let digits = &data[start..*pos];

    if digits.is_empty() {
        return Err(BencodeError::InvalidInteger("empty".into()));
    }

    // Only an optional leading '-' followed by digits; `parse` alone would
    // also accept a '+' sign.
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidInteger(
            String::from_utf8_lossy(digits).into_owned(),
        ));
    }

    // Minimal form: no leading zeros, and zero is never negative.
    if digits == b"-0" || (unsigned.len() > 1 && unsigned[0] == b'0') {
        return Err(BencodeError::InvalidInteger("leading zeros".into()));
    }

    let int_str =
        std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger("non-ascii".into()))?;
    let value: i64 = int_str
        .parse()
        .map_err(|_| BencodeError::InvalidInteger(int_str.into()))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let len = decode_length(data, pos)?;

    if *pos + len > data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;

    Ok(Value::Bytes(bytes))
}

fn decode_length(data: &[u8], pos: &mut usize) -> Result<usize, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let len_str =
        std::str::from_utf8(&data[start..*pos]).map_err(|_| BencodeError::InvalidStringLength)?;

    let len: usize = len_str
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    *pos += 1;
    Ok(len)
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        let key = match decode_value(data, pos, depth + 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::UnexpectedChar(data[*pos] as char)),
        };

        let value = decode_value(data, pos, depth + 1)?;
        if dict.insert(key.clone(), value).is_some() {
            return Err(BencodeError::DuplicateKey(
                String::from_utf8_lossy(&key).into_owned(),
            ));
        }
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}

// Advances `pos` past one value without building it.
fn skip_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<(), BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    match data[*pos] {
        b'i' => {
            *pos += 1;
            while *pos < data.len() && data[*pos] != b'e' {
                *pos += 1;
            }
            if *pos >= data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += 1;
        }
        b'l' | b'd' => {
            let is_dict = data[*pos] == b'd';
            *pos += 1;
            while *pos < data.len() && data[*pos] != b'e' {
                skip_value(data, pos, depth + 1)?;
                if is_dict {
                    skip_value(data, pos, depth + 1)?;
                }
            }
            if *pos >= data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += 1;
        }
        b'0'..=b'9' => {
            let len = decode_length(data, pos)?;
            if *pos + len > data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += len;
        }
        c => return Err(BencodeError::UnexpectedChar(c as char)),
    }

    Ok(())
}
