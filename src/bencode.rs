//! Bencode encoding and decoding (BEP-3)
//!
//! Bencode is the container encoding used by BitTorrent for metainfo files,
//! tracker responses, and extension-protocol payloads. The decoder is strict:
//! duplicate dictionary keys, non-minimal integers, and trailing data are all
//! rejected, so that re-encoding a decoded value reproduces the input bytes.

mod decode;
mod error;
mod value;

pub use decode::{decode, value_span};
pub use error::BencodeError;
pub use value::Value;

/// Encodes a value to canonical bencode. See [`Value::encode`].
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    value.encode()
}

#[cfg(test)]
mod tests;
