//! swell - a download-only BitTorrent client
//!
//! Given a `.torrent` file or a magnet link, swell announces to trackers,
//! fetches metadata from peers when only a magnet is known, downloads
//! pieces from many peers concurrently, verifies every piece against its
//! SHA-1 digest, and writes the result into the target files.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`metainfo`] - Torrent metainfo, info hashes, magnet links
//! - [`peer`] - Peer wire protocol, extension protocol, metadata exchange,
//!   peer sessions
//! - [`tracker`] - HTTP and UDP tracker protocols, BEP-12 tiers
//! - [`queue`] - Deduplicated peer endpoint queue
//! - [`registry`] - Piece/block download coordination
//! - [`storage`] - Disk layout, writing, resume sidecar
//! - [`client`] - The download supervisor and magnet bootstrap

pub mod bencode;
pub mod client;
pub mod metainfo;
pub mod peer;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use client::{download, download_with_peers, fetch_metadata, Config, DownloadError};
pub use metainfo::{FileEntry, InfoHash, MagnetLink, Metainfo, MetainfoError};
pub use peer::{Bitfield, Handshake, Message, PeerError, PeerId, WireEvent, WireMachine};
pub use registry::{BlockSpec, Delivered, PeerKey, RegistryHandle};
pub use storage::{ResumeData, StorageError};
pub use tracker::{AnnounceParams, AnnounceResponse, TrackerError, TrackerEvent};
