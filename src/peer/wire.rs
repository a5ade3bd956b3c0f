//! Sans-I/O driver for the peer wire protocol.
//!
//! The machine owns no sockets. Its only inputs are bytes received from the
//! peer ([`WireMachine::feed`]) and messages the session wants to send
//! ([`WireMachine::send`]); its only outputs are parsed events
//! ([`WireMachine::poll`]) and bytes to write
//! ([`WireMachine::take_outbound`]). The caller performs all I/O and drives
//! the machine in a loop.

use bytes::{Bytes, BytesMut};

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::metainfo::{InfoHash, BLOCK_SIZE};

/// Default cap on the length prefix of a single frame: one id byte, the
/// piece/begin header, and one block of payload.
pub const DEFAULT_FRAME_CAP: usize = 1 + 8 + BLOCK_SIZE as usize;

/// Connection phase of the wire machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireState {
    /// Waiting for the peer's 68-byte handshake.
    AwaitingHandshake,
    /// Handshake done; the next message may be the peer's one-time bitfield.
    AwaitingBitfield,
    /// Normal length-prefixed message stream.
    Established,
    /// Terminal: a fatal error occurred or the stream ended.
    Closed,
}

/// A parsed event produced by the machine.
#[derive(Debug)]
pub enum WireEvent {
    /// The peer's handshake was received and its info hash verified.
    Handshake {
        /// The peer id the remote sent. Recorded, not trusted.
        peer_id: [u8; 20],
        /// Whether the peer set the extension-protocol reserved bit.
        extensions: bool,
    },
    /// A protocol message.
    Message(Message),
}

/// Incremental, Sans-I/O peer wire protocol machine.
///
/// # Examples
///
/// ```
/// use swell::metainfo::InfoHash;
/// use swell::peer::{PeerId, WireMachine};
///
/// let info_hash = InfoHash::from_bytes([7; 20]);
/// let mut machine = WireMachine::new(info_hash, *PeerId::generate().as_bytes(), Some(100));
///
/// // Our handshake is queued immediately.
/// let out = machine.take_outbound().unwrap();
/// assert_eq!(out.len(), 68);
///
/// // Nothing to parse yet.
/// assert!(machine.poll().unwrap().is_none());
/// ```
pub struct WireMachine {
    state: WireState,
    inbound: BytesMut,
    outbound: BytesMut,
    info_hash: InfoHash,
    piece_count: Option<usize>,
    frame_cap: usize,
}

impl WireMachine {
    /// Creates a machine for a torrent with `piece_count` pieces and queues
    /// our handshake.
    ///
    /// `piece_count` is `None` during magnet bootstrap, where the piece
    /// count is unknown and bitfields of any length are accepted.
    pub fn new(info_hash: InfoHash, peer_id: [u8; 20], piece_count: Option<usize>) -> Self {
        let mut machine = Self {
            state: WireState::AwaitingHandshake,
            inbound: BytesMut::with_capacity(32 * 1024),
            outbound: BytesMut::new(),
            info_hash,
            piece_count,
            frame_cap: DEFAULT_FRAME_CAP,
        };
        machine
            .outbound
            .extend_from_slice(&Handshake::new(info_hash, peer_id).encode());
        machine
    }

    /// Overrides the frame cap. Metadata exchange needs room for a 16 KiB
    /// metadata piece plus its bencoded header.
    pub fn with_frame_cap(mut self, cap: usize) -> Self {
        self.frame_cap = cap;
        self
    }

    /// Returns the current connection phase.
    pub fn state(&self) -> WireState {
        self.state
    }

    /// Appends bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Queues a message for transmission.
    pub fn send(&mut self, message: &Message) {
        self.outbound.extend_from_slice(&message.encode());
    }

    /// Takes all bytes queued for transmission, if any.
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            None
        } else {
            Some(self.outbound.split().freeze())
        }
    }

    /// Signals end of stream. Fails if the peer hung up mid-frame.
    pub fn on_eof(&mut self) -> Result<(), PeerError> {
        let truncated = !self.inbound.is_empty();
        self.state = WireState::Closed;
        if truncated {
            Err(PeerError::TruncatedStream)
        } else {
            Ok(())
        }
    }

    /// Parses the next whole event out of the buffered input.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Frames with unknown
    /// message ids are dropped silently. Any returned error is fatal and
    /// leaves the machine [`WireState::Closed`].
    pub fn poll(&mut self) -> Result<Option<WireEvent>, PeerError> {
        loop {
            match self.state {
                WireState::Closed => return Ok(None),
                WireState::AwaitingHandshake => {
                    if self.inbound.len() < HANDSHAKE_LEN {
                        return Ok(None);
                    }

                    let frame = self.inbound.split_to(HANDSHAKE_LEN);
                    let handshake = match Handshake::decode(&frame) {
                        Ok(hs) => hs,
                        Err(e) => {
                            self.state = WireState::Closed;
                            return Err(e);
                        }
                    };

                    if handshake.info_hash != self.info_hash {
                        self.state = WireState::Closed;
                        return Err(PeerError::InfoHashMismatch);
                    }

                    self.state = WireState::AwaitingBitfield;
                    return Ok(Some(WireEvent::Handshake {
                        peer_id: handshake.peer_id,
                        extensions: handshake.supports_extension_protocol(),
                    }));
                }
                WireState::AwaitingBitfield | WireState::Established => {
                    if self.inbound.len() < 4 {
                        return Ok(None);
                    }

                    let length = u32::from_be_bytes([
                        self.inbound[0],
                        self.inbound[1],
                        self.inbound[2],
                        self.inbound[3],
                    ]) as usize;

                    if length > self.frame_cap {
                        self.state = WireState::Closed;
                        return Err(PeerError::FrameTooLarge(length));
                    }

                    if self.inbound.len() < 4 + length {
                        return Ok(None);
                    }

                    let frame = self.inbound.split_to(4 + length).freeze();
                    let message = match Message::decode(frame) {
                        Ok(message) => message,
                        Err(PeerError::UnknownMessageId(_)) => continue,
                        Err(e) => {
                            self.state = WireState::Closed;
                            return Err(e);
                        }
                    };

                    match &message {
                        Message::Bitfield(bits) => {
                            if self.state == WireState::Established {
                                self.state = WireState::Closed;
                                return Err(PeerError::Protocol(
                                    "bitfield after first message".into(),
                                ));
                            }
                            if let Some(count) = self.piece_count {
                                if bits.len() != count.div_ceil(8) {
                                    self.state = WireState::Closed;
                                    return Err(PeerError::Protocol(
                                        "bitfield length mismatch".into(),
                                    ));
                                }
                            }
                            self.state = WireState::Established;
                        }
                        // A keepalive keeps the one-time bitfield window open.
                        Message::KeepAlive => {}
                        _ => self.state = WireState::Established,
                    }

                    return Ok(Some(WireEvent::Message(message)));
                }
            }
        }
    }
}
