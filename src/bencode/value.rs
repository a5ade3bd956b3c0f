use std::collections::BTreeMap;
use std::io::Write;

use bytes::Bytes;

use super::error::BencodeError;

/// A bencode value.
///
/// Bencode has four data types: integers, byte strings, lists, and
/// dictionaries. Dictionary keys are byte strings; using a `BTreeMap` keeps
/// them in the ascending order that canonical bencode requires.
///
/// # Examples
///
/// ```
/// use swell::bencode::Value;
///
/// let int = Value::Integer(42);
/// let string = Value::string("hello");
///
/// assert_eq!(int.as_integer(), Some(42));
/// assert_eq!(string.as_str(), Some("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (not necessarily valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte-string keys, sorted ascending.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a byte string, if it is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the value as a list, if it is one.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the value as a dictionary, if it is one.
    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    ///
    /// Returns `None` if the value is not a dictionary or the key is absent.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }

    /// Serializes the value to canonical bencode.
    ///
    /// Canonical means dictionary keys in ascending byte order (which the
    /// `BTreeMap` representation guarantees) and integers in minimal
    /// decimal form, so encoding a strictly-decoded value reproduces the
    /// input bytes. This matters beyond cosmetics: extension-handshake and
    /// ut_metadata payloads are bencoded on the wire, and the resume
    /// sidecar must re-read identically.
    pub fn encode(&self) -> Result<Vec<u8>, BencodeError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), BencodeError> {
        match self {
            Value::Integer(i) => write!(writer, "i{}e", i)?,
            Value::Bytes(bytes) => write_byte_string(writer, bytes)?,
            Value::List(items) => {
                writer.write_all(b"l")?;
                for item in items {
                    item.write_to(writer)?;
                }
                writer.write_all(b"e")?;
            }
            Value::Dict(entries) => {
                writer.write_all(b"d")?;
                for (key, value) in entries {
                    write_byte_string(writer, key)?;
                    value.write_to(writer)?;
                }
                writer.write_all(b"e")?;
            }
        }
        Ok(())
    }
}

// Keys and byte strings share the <length>:<bytes> form.
fn write_byte_string<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), BencodeError> {
    write!(writer, "{}:", bytes.len())?;
    writer.write_all(bytes)?;
    Ok(())
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}
