use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::error::StorageError;
use crate::metainfo::Metainfo;

// The part of a piece that lands in a single file.
struct Span {
    file_index: usize,
    file_offset: u64,
    length: u64,
}

/// The target files of a download.
///
/// Owned by the writer task; nothing else touches the target files. File
/// handles are opened lazily and kept for the lifetime of the download.
pub struct TorrentFiles {
    base: PathBuf,
    meta: Arc<Metainfo>,
    handles: HashMap<usize, File>,
}

impl TorrentFiles {
    pub fn new(base: PathBuf, meta: Arc<Metainfo>) -> Self {
        Self {
            base,
            meta,
            handles: HashMap::new(),
        }
    }

    /// Creates every target file at its final length, with parent
    /// directories. Existing files are truncated to the expected length so
    /// later writes stay inside the layout.
    pub async fn allocate(&self) -> Result<(), StorageError> {
        for entry in &self.meta.files {
            let path = self.base.join(&entry.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;
            file.set_len(entry.length).await?;
        }
        Ok(())
    }

    /// Writes a verified piece at its global offset, splitting it across
    /// file boundaries as needed.
    pub async fn write_piece(&mut self, piece: u32, data: &[u8]) -> Result<(), StorageError> {
        let expected = self.piece_size_checked(piece)? as usize;
        if data.len() != expected {
            return Err(StorageError::PieceLengthMismatch {
                index: piece,
                actual: data.len(),
                expected,
            });
        }

        let mut data_offset = 0usize;
        for span in self.piece_spans(piece) {
            let chunk = &data[data_offset..data_offset + span.length as usize];
            let file = self.handle(span.file_index).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.write_all(chunk).await?;
            data_offset += span.length as usize;
        }

        Ok(())
    }

    /// Reads a piece back from disk, for resume verification.
    pub async fn read_piece(&mut self, piece: u32) -> Result<Bytes, StorageError> {
        let size = self.piece_size_checked(piece)? as usize;
        let mut data = Vec::with_capacity(size);

        for span in self.piece_spans(piece) {
            let file = self.handle(span.file_index).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            let mut buf = vec![0u8; span.length as usize];
            file.read_exact(&mut buf).await?;
            data.extend_from_slice(&buf);
        }

        Ok(Bytes::from(data))
    }

    /// Flushes every open handle to disk.
    pub async fn sync_all(&mut self) -> Result<(), StorageError> {
        for file in self.handles.values_mut() {
            file.sync_data().await?;
        }
        Ok(())
    }

    fn piece_size_checked(&self, piece: u32) -> Result<u64, StorageError> {
        if (piece as usize) < self.meta.piece_count() {
            Ok(self.meta.piece_size(piece))
        } else {
            Err(StorageError::InvalidPieceIndex(piece))
        }
    }

    fn piece_spans(&self, piece: u32) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut remaining = self.meta.piece_size(piece);
        let mut current = piece as u64 * self.meta.piece_length;

        for (file_index, file) in self.meta.files.iter().enumerate() {
            if remaining == 0 {
                break;
            }

            let file_end = file.offset + file.length;
            if current >= file.offset && current < file_end {
                let take = remaining.min(file_end - current);
                spans.push(Span {
                    file_index,
                    file_offset: current - file.offset,
                    length: take,
                });
                current += take;
                remaining -= take;
            }
        }

        spans
    }

    async fn handle(&mut self, file_index: usize) -> Result<&mut File, StorageError> {
        match self.handles.entry(file_index) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self.base.join(&self.meta.files[file_index].path);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&path)
                    .await?;
                Ok(entry.insert(file))
            }
        }
    }
}
