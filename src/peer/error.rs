use thiserror::Error;

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent an invalid handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received a message id we don't implement. Not fatal: the wire
    /// machine drops the frame and keeps parsing.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// The peer announced a frame longer than the configured cap.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The stream ended in the middle of a frame.
    #[error("stream truncated mid-message")]
    TruncatedStream,

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// Protocol violation by the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Extension protocol error.
    #[error("extension error: {0}")]
    Extension(String),

    /// A completed piece failed its hash check with this peer as the last
    /// deliverer.
    #[error("piece {0} failed verification")]
    BadPieceData(u32),

    /// Error decoding bencode in extension messages.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
