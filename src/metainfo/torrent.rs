use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, value_span, Value};

/// The transmission unit on the peer wire: 16 KiB.
pub const BLOCK_SIZE: u32 = 16384;

/// A parsed torrent file.
///
/// Immutable after construction and shared by reference for the lifetime of
/// a download. The info hash is computed over the verbatim bytes of the
/// `info` value in the original buffer.
///
/// # Examples
///
/// ```no_run
/// use swell::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("Torrent: {}", metainfo.name);
/// println!("Size: {} bytes", metainfo.total_length);
/// println!("Info hash: {}", metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The unique identifier for this torrent.
    pub info_hash: InfoHash,
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece (the last piece may be shorter).
    pub piece_length: u64,
    /// SHA-1 digest of each piece.
    pub pieces: Vec<[u8; 20]>,
    /// Flattened file layout, ordered by global offset.
    pub files: Vec<FileEntry>,
    /// Total size of all files combined.
    pub total_length: u64,
    /// Tracker URLs grouped into tiers (BEP-12). A bare `announce` key
    /// becomes a single one-URL tier.
    pub announce_list: Vec<Vec<String>>,
    raw_info: Bytes,
}

/// A file within a torrent.
///
/// Single-file torrents have one entry at the root; multi-file torrents nest
/// their entries under the torrent name.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path to the file, relative to the download directory.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub length: u64,
    /// Byte offset within the concatenated piece data.
    pub offset: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
        }
    }
}

impl Metainfo {
    /// Parses a `.torrent` file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not strict bencode, required fields
    /// are missing, the piece table is inconsistent with the file lengths,
    /// or a file path would escape the download directory.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let span = value_span(data, b"info")?.ok_or(MetainfoError::MissingField("info"))?;
        let raw_info = Bytes::copy_from_slice(&data[span]);

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;

        let announce_list = parse_announce_list(dict.get(b"announce-list".as_slice()))
            .or_else(|| {
                dict.get(b"announce".as_slice())
                    .and_then(|v| v.as_str())
                    .map(|url| vec![vec![url.to_string()]])
            })
            .unwrap_or_default();

        Self::from_info_value(info_value, raw_info, announce_list)
    }

    /// Builds a metainfo from raw `info` bytes obtained through metadata
    /// exchange, together with the magnet link's tracker hints.
    pub fn from_raw_info(
        raw_info: &[u8],
        trackers: Vec<String>,
    ) -> Result<Self, MetainfoError> {
        let info_value = decode(raw_info)?;
        let announce_list = trackers.into_iter().map(|url| vec![url]).collect();
        Self::from_info_value(
            &info_value,
            Bytes::copy_from_slice(raw_info),
            announce_list,
        )
    }

    fn from_info_value(
        info: &Value,
        raw_info: Bytes,
        announce_list: Vec<Vec<String>>,
    ) -> Result<Self, MetainfoError> {
        let dict = info.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

        let name = dict
            .get(b"name".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = dict
            .get(b"piece length".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or(MetainfoError::MissingField("piece length"))?;
        if piece_length <= 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }
        let piece_length = piece_length as u64;

        let pieces_bytes = dict
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or(MetainfoError::MissingField("pieces"))?;

        if pieces_bytes.len() % 20 != 0 {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        let pieces: Vec<[u8; 20]> = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(chunk);
                arr
            })
            .collect();

        let (files, total_length) = parse_files(dict, &name)?;

        // The piece table must cover the payload exactly: the last piece is
        // the only one allowed to be short, and it must not be empty.
        let piece_count = pieces.len() as u64;
        if piece_count * piece_length < total_length
            || total_length <= (piece_count.saturating_sub(1)) * piece_length
        {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        for file in &files {
            validate_path(&file.path)?;
        }

        Ok(Self {
            info_hash: InfoHash::from_info_bytes(&raw_info),
            name,
            piece_length,
            pieces,
            files,
            total_length,
            announce_list,
            raw_info,
        })
    }

    /// Returns the raw bencoded `info` bytes.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Returns the number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Returns the length of the piece at `index`; only the last piece may
    /// be shorter than `piece_length`.
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = index as u64 * self.piece_length;
        (self.total_length - start).min(self.piece_length)
    }

    /// Returns the number of 16 KiB blocks in the piece at `index`.
    pub fn block_count(&self, index: u32) -> u32 {
        self.piece_size(index).div_ceil(BLOCK_SIZE as u64) as u32
    }

    /// Returns the length of the block at `offset` within piece `index`.
    pub fn block_size(&self, index: u32, offset: u32) -> u32 {
        let piece_size = self.piece_size(index);
        (piece_size - offset as u64).min(BLOCK_SIZE as u64) as u32
    }
}

fn parse_announce_list(value: Option<&Value>) -> Option<Vec<Vec<String>>> {
    let tiers: Vec<Vec<String>> = value?
        .as_list()?
        .iter()
        .filter_map(|tier| {
            let urls: Vec<String> = tier
                .as_list()?
                .iter()
                .filter_map(|u| u.as_str().map(String::from))
                .collect();
            (!urls.is_empty()).then_some(urls)
        })
        .collect();
    (!tiers.is_empty()).then_some(tiers)
}

fn parse_files(
    dict: &std::collections::BTreeMap<Bytes, Value>,
    name: &str,
) -> Result<(Vec<FileEntry>, u64), MetainfoError> {
    if let Some(length) = dict.get(b"length".as_slice()).and_then(|v| v.as_integer()) {
        // Single file mode: one entry at the root.
        let length = length as u64;
        let file = FileEntry::new(PathBuf::from(name), length, 0);
        return Ok((vec![file], length));
    }

    let files_list = dict
        .get(b"files".as_slice())
        .and_then(|v| v.as_list())
        .ok_or(MetainfoError::MissingField("length or files"))?;

    let mut files = Vec::new();
    let mut offset = 0u64;

    for file_value in files_list {
        let file_dict = file_value
            .as_dict()
            .ok_or(MetainfoError::InvalidField("files"))?;

        let length = file_dict
            .get(b"length".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or(MetainfoError::MissingField("file length"))? as u64;

        let path_list = file_dict
            .get(b"path".as_slice())
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("file path"))?;

        let path: PathBuf = std::iter::once(name.to_string())
            .chain(
                path_list
                    .iter()
                    .filter_map(|p| p.as_str().map(String::from)),
            )
            .collect();

        files.push(FileEntry::new(path, length, offset));
        offset += length;
    }

    if files.is_empty() {
        return Err(MetainfoError::InvalidField("files"));
    }

    Ok((files, offset))
}

fn validate_path(path: &Path) -> Result<(), MetainfoError> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MetainfoError::UnsafePath(path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}
