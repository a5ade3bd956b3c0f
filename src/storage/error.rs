use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("piece {index} has length {actual}, expected {expected}")]
    PieceLengthMismatch {
        index: u32,
        actual: usize,
        expected: usize,
    },

    #[error("piece channel closed with {0} pieces missing")]
    Incomplete(usize),

    #[error("resume data does not describe this torrent")]
    ResumeMismatch,

    #[error("resume data is malformed")]
    ResumeCorrupt,
}
