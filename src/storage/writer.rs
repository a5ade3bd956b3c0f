use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::StorageError;
use super::files::TorrentFiles;
use super::resume::{sidecar_path, ResumeData};
use crate::metainfo::Metainfo;

/// The writer task: the sole writer of the target files.
///
/// Consumes verified pieces from the registry until every piece has been
/// persisted, updating the resume sidecar as it goes. Returns `Ok` only
/// once every piece is on disk; fatal I/O problems and a piece channel
/// that closes early both surface as errors that abort the download.
pub async fn run_writer(
    meta: Arc<Metainfo>,
    folder: PathBuf,
    seeded: Vec<u32>,
    mut pieces: mpsc::Receiver<(u32, Bytes)>,
) -> Result<(), StorageError> {
    let mut files = TorrentFiles::new(folder.clone(), meta.clone());
    files.allocate().await?;

    let resume_path = sidecar_path(&folder, &meta.name);
    let mut resume = ResumeData::new(meta.info_hash, meta.piece_count());
    let mut written = vec![false; meta.piece_count()];
    let mut outstanding = meta.piece_count();

    for &piece in &seeded {
        let index = piece as usize;
        if index < written.len() && !written[index] {
            written[index] = true;
            resume.set_piece(piece);
            outstanding -= 1;
        }
    }

    while outstanding > 0 {
        let Some((piece, data)) = pieces.recv().await else {
            // The registry hung up before every piece arrived. Flush what
            // we have, but never report an unfinished download as success.
            files.sync_all().await?;
            return Err(StorageError::Incomplete(outstanding));
        };

        if written[piece as usize] {
            continue;
        }

        files.write_piece(piece, &data).await?;
        written[piece as usize] = true;
        resume.set_piece(piece);
        resume.save(&resume_path).await?;
        outstanding -= 1;

        tracing::info!(
            piece,
            remaining = outstanding,
            total = meta.piece_count(),
            "piece written"
        );
    }

    files.sync_all().await?;
    tracing::info!("all pieces written and flushed");
    Ok(())
}
