use std::collections::HashMap;

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed magnet link (BEP-9).
///
/// Magnet links carry the info hash and tracker hints but no `info`
/// dictionary; the metadata itself is fetched from peers.
///
/// # Examples
///
/// ```
/// use swell::metainfo::MagnetLink;
///
/// let uri = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a\
///            &dn=Example&tr=http%3A%2F%2Ftracker.example.com%2Fannounce";
///
/// let magnet = MagnetLink::parse(uri).unwrap();
/// assert_eq!(magnet.display_name.as_deref(), Some("Example"));
/// assert_eq!(magnet.trackers.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MagnetLink {
    /// The torrent's info hash (required).
    pub info_hash: InfoHash,
    /// Suggested display name from the `dn` parameter.
    pub display_name: Option<String>,
    /// Tracker URLs from the `tr` parameter.
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// The `xt` parameter is required and must be `urn:btih:` followed by a
    /// 40-character hex or 32-character base32 info hash. `tr` may appear
    /// multiple times; all other parameters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MetainfoError::InvalidMagnetLink`] if the scheme is wrong,
    /// `xt` is missing, or the info hash cannot be decoded.
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| MetainfoError::InvalidMagnetLink("missing magnet:? prefix".into()))?;

        let params = parse_query_string(query);

        let xt = params
            .get("xt")
            .and_then(|v| v.first())
            .ok_or_else(|| MetainfoError::InvalidMagnetLink("missing xt parameter".into()))?;

        let hash = xt
            .strip_prefix("urn:btih:")
            .ok_or_else(|| MetainfoError::InvalidMagnetLink("unsupported xt format".into()))?;

        let info_hash = if hash.len() == 40 {
            InfoHash::from_hex(hash)?
        } else if hash.len() == 32 {
            let decoded = base32_decode(hash)
                .filter(|b| b.len() == 20)
                .ok_or_else(|| MetainfoError::InvalidMagnetLink("invalid base32".into()))?;
            let mut arr = [0u8; 20];
            arr.copy_from_slice(&decoded);
            InfoHash::from_bytes(arr)
        } else {
            return Err(MetainfoError::InvalidMagnetLink(
                "invalid info hash length".into(),
            ));
        };

        let display_name = params
            .get("dn")
            .and_then(|v| v.first())
            .map(|s| url_decode(s));

        let trackers = params
            .get("tr")
            .map(|v| v.iter().map(|s| url_decode(s)).collect())
            .unwrap_or_default();

        Ok(Self {
            info_hash,
            display_name,
            trackers,
        })
    }
}

fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    params
}

fn url_decode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if c == '+' {
            result.push(' ');
        } else {
            result.push(c);
        }
    }

    result
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let input = input.to_uppercase();
    let input = input.trim_end_matches('=');

    let mut output = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for c in input.chars() {
        let value = ALPHABET.iter().position(|&x| x == c as u8)? as u64;
        buffer = (buffer << 5) | value;
        bits_in_buffer += 5;

        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            output.push((buffer >> bits_in_buffer) as u8);
            buffer &= (1 << bits_in_buffer) - 1;
        }
    }

    Some(output)
}
