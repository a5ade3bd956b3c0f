//! Disk storage: placing verified pieces into the target files.
//!
//! A piece may span several files; this module maps piece bytes onto
//! `(file, offset, length)` spans of the flattened layout, owns the only
//! task that writes the target files, and keeps the resume sidecar that
//! lets an interrupted download pick up where it left off.

mod error;
mod files;
mod resume;
mod writer;

pub use error::StorageError;
pub use files::TorrentFiles;
pub use resume::{sidecar_path, ResumeData};
pub use writer::run_writer;
