use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::error::StorageError;
use crate::bencode::{decode, encode, Value};
use crate::metainfo::InfoHash;
use crate::peer::Bitfield;

/// Resume sidecar: which pieces are already complete on disk.
///
/// Persisted as a bencoded dictionary `{have: <bitfield bytes>,
/// info_hash: <20 bytes>}` next to the download, so a sidecar belonging to
/// a different torrent is recognized and rejected.
pub struct ResumeData {
    info_hash: InfoHash,
    have: Bitfield,
}

/// Returns the sidecar location for a download.
pub fn sidecar_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("{}.swell-resume", name))
}

impl ResumeData {
    /// Creates empty resume data for a fresh download.
    pub fn new(info_hash: InfoHash, piece_count: usize) -> Self {
        Self {
            info_hash,
            have: Bitfield::new(piece_count),
        }
    }

    /// Marks a piece as complete.
    pub fn set_piece(&mut self, piece: u32) {
        self.have.set_piece(piece as usize);
    }

    /// Indices of pieces recorded as complete.
    pub fn pieces(&self) -> Vec<u32> {
        (0..self.have.piece_count())
            .filter(|&i| self.have.has_piece(i))
            .map(|i| i as u32)
            .collect()
    }

    fn encode_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"have"), Value::Bytes(self.have.to_bytes()));
        dict.insert(
            Bytes::from_static(b"info_hash"),
            Value::Bytes(Bytes::copy_from_slice(self.info_hash.as_bytes())),
        );
        encode(&Value::Dict(dict)).map_err(|_| StorageError::ResumeCorrupt)
    }

    fn decode_bytes(
        data: &[u8],
        info_hash: InfoHash,
        piece_count: usize,
    ) -> Result<Self, StorageError> {
        let value = decode(data).map_err(|_| StorageError::ResumeCorrupt)?;

        let stored_hash = value
            .get(b"info_hash")
            .and_then(|v| v.as_bytes())
            .ok_or(StorageError::ResumeCorrupt)?;
        if stored_hash.as_ref() != info_hash.as_bytes() {
            return Err(StorageError::ResumeMismatch);
        }

        let have = value
            .get(b"have")
            .and_then(|v| v.as_bytes())
            .ok_or(StorageError::ResumeCorrupt)?;
        if have.len() != piece_count.div_ceil(8) {
            return Err(StorageError::ResumeMismatch);
        }

        Ok(Self {
            info_hash,
            have: Bitfield::from_bytes(have, piece_count),
        })
    }

    /// Persists the sidecar. Written through a temporary file so a crash
    /// mid-write leaves the previous sidecar intact.
    pub async fn save(&self, path: &Path) -> Result<(), StorageError> {
        let bytes = self.encode_bytes()?;
        let tmp = path.with_extension("swell-resume.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Loads a sidecar, verifying it describes the torrent with the given
    /// info hash and piece count.
    pub async fn load(
        path: &Path,
        info_hash: InfoHash,
        piece_count: usize,
    ) -> Result<Self, StorageError> {
        let data = tokio::fs::read(path).await?;
        Self::decode_bytes(&data, info_hash, piece_count)
    }
}
