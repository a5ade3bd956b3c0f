//! Tracker protocols (BEP-3, BEP-12, BEP-15, BEP-23).
//!
//! Trackers are how a download discovers peers: the client "announces"
//! itself with the torrent's info hash and gets back a list of endpoints
//! plus the interval to wait before announcing again. This module
//! implements the HTTP(S) announce (with compact peer lists, BEP-23), the
//! UDP variant (BEP-15, a stop-and-wait protocol with exponential
//! retransmission backoff), and the BEP-12 tier rotation that picks which
//! tracker to talk to.

mod announce;
mod error;
mod http;
mod tiers;
mod udp;

pub use announce::{parse_compact_peers, AnnounceParams, AnnounceResponse, TrackerEvent};
pub use error::TrackerError;
pub use http::HttpTracker;
pub use tiers::TrackerTiers;
pub use udp::UdpTracker;
