//! Peer wire protocol (BEP-3, BEP-9, BEP-10)
//!
//! This module implements the BitTorrent peer wire protocol: the message
//! codec, a Sans-I/O protocol machine that turns received bytes into parsed
//! messages and session commands into outbound bytes, the extension
//! protocol with ut_metadata for magnet bootstrap, and the per-peer session
//! task that binds the machine to a TCP socket and the piece registry.

mod bitfield;
mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod session;
mod wire;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use metadata::{
    fetch_metadata_from_peer, MetadataBuffer, MetadataMessage, MetadataMessageType,
    METADATA_PIECE_SIZE,
};
pub use peer_id::PeerId;
pub use session::{run_session, SessionConfig};
pub use wire::{WireEvent, WireMachine, WireState};
