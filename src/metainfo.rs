//! Torrent metainfo handling (BEP-3, BEP-9, BEP-12)
//!
//! This module parses `.torrent` files and magnet links, computes info
//! hashes from the verbatim `info` bytes, and flattens single- and
//! multi-file layouts into one ordered file sequence.

mod error;
mod info_hash;
mod magnet;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use magnet::MagnetLink;
pub use torrent::{FileEntry, Metainfo, BLOCK_SIZE};

#[cfg(test)]
mod tests;
