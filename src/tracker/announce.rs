use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::metainfo::InfoHash;

/// Lifecycle event reported with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Regular periodic announce.
    None,
    /// First announce of the download.
    Started,
    /// Sent when the client goes away.
    Stopped,
    /// The download finished.
    Completed,
}

impl TrackerEvent {
    /// Query-string value for HTTP announces; the empty string means no
    /// `event` parameter at all.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// Event id in UDP announce frames (BEP-15).
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// Everything a tracker wants to know about us and the download state.
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    /// Port we would accept connections on.
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes still missing.
    pub left: u64,
    pub event: TrackerEvent,
    /// How many peers to ask for; `None` lets each protocol use its
    /// default (50 for HTTP, the tracker's choice for UDP).
    pub num_want: Option<u32>,
}

/// What a tracker told us: when to come back and whom to talk to.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds to wait before the next regular announce.
    pub interval: u32,
    /// Peer endpoints, deduplicated on `(ip, port)` by the peer queue.
    pub peers: Vec<SocketAddr>,
    /// Seeder count, if reported.
    pub complete: Option<u32>,
    /// Leecher count, if reported.
    pub incomplete: Option<u32>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            peers: Vec::new(),
            complete: None,
            incomplete: None,
        }
    }
}

/// Parses a compact peer list (BEP-23): 6 bytes per peer, 4 for the IPv4
/// address and 2 for the big-endian port. A trailing partial record is
/// ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}

/// Percent-encodes raw bytes for a tracker query string, byte by byte.
pub(super) fn url_encode_bytes(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(60), |mut s, b| {
        use std::fmt::Write;
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            s.push(*b as char);
        } else {
            let _ = write!(s, "%{:02X}", b);
        }
        s
    })
}
