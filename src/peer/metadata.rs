//! Metadata exchange (ut_metadata, BEP-9).
//!
//! Magnet links carry only an info hash; the `info` dictionary itself is
//! fetched from peers over the extension protocol. The metadata is split
//! into 16 KiB pieces requested one at a time; the assembled bytes must
//! hash to the magnet's info hash.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
use super::message::Message;
use super::wire::{WireEvent, WireMachine};
use crate::bencode::{decode, encode, Value};
use crate::metainfo::InfoHash;

/// The size of a metadata piece (16 KiB).
pub const METADATA_PIECE_SIZE: usize = 16384;

/// The id we listen on for ut_metadata messages.
const LOCAL_UT_METADATA_ID: u8 = 3;

/// Metadata frames carry a 16 KiB piece plus a bencoded header, so the
/// default wire frame cap is too small for them.
const METADATA_FRAME_CAP: usize = 64 * 1024;

/// Upper bound on an announced metadata size; larger values are treated as
/// a protocol violation.
const MAX_METADATA_SIZE: usize = 16 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Message types for the ut_metadata extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// A ut_metadata message: a bencoded header, followed by raw piece bytes
/// for data messages.
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Total metadata size; only present in data messages.
    pub total_size: Option<u32>,
    /// Raw metadata bytes; only present in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let mut dict = BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as u8 as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(self.piece as i64),
        );
        if let Some(total_size) = self.total_size {
            dict.insert(
                Bytes::from_static(b"total_size"),
                Value::Integer(total_size as i64),
            );
        }

        let header = encode(&Value::Dict(dict))?;

        match &self.data {
            Some(data) => {
                let mut result = Vec::with_capacity(header.len() + data.len());
                result.extend_from_slice(&header);
                result.extend_from_slice(data);
                Ok(Bytes::from(result))
            }
            None => Ok(Bytes::from(header)),
        }
    }

    /// Decodes a metadata message; the raw bytes of a data message follow
    /// the bencoded header.
    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let header_end = find_dict_end(payload)?;

        let value = decode(&payload[..header_end])?;
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("expected dict".into()))?;

        let msg_type = dict
            .get(b"msg_type".as_slice())
            .and_then(|v| v.as_integer())
            .and_then(|v| u8::try_from(v).ok())
            .and_then(MetadataMessageType::from_byte)
            .ok_or_else(|| PeerError::Extension("bad msg_type".into()))?;

        let piece = dict
            .get(b"piece".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| PeerError::Extension("missing piece".into()))? as u32;

        let total_size = dict
            .get(b"total_size".as_slice())
            .and_then(|v| v.as_integer())
            .map(|v| v as u32);

        let data = if msg_type == MetadataMessageType::Data && header_end < payload.len() {
            Some(Bytes::copy_from_slice(&payload[header_end..]))
        } else {
            None
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

// Finds where the bencoded header ends so the raw piece bytes can be split
// off without decoding them.
fn find_dict_end(payload: &[u8]) -> Result<usize, PeerError> {
    if payload.first() != Some(&b'd') {
        return Err(PeerError::Extension("payload must start with 'd'".into()));
    }

    let mut depth = 0usize;
    let mut i = 0;

    while i < payload.len() {
        match payload[i] {
            b'd' | b'l' => {
                depth += 1;
                i += 1;
            }
            b'e' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PeerError::Extension("unbalanced dict".into()))?;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            b'i' => {
                i += 1;
                while i < payload.len() && payload[i] != b'e' {
                    i += 1;
                }
                i += 1;
            }
            b'0'..=b'9' => {
                let len_start = i;
                while i < payload.len() && payload[i] != b':' {
                    i += 1;
                }
                let len: usize = std::str::from_utf8(&payload[len_start..i])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| PeerError::Extension("invalid string length".into()))?;
                i += 1 + len;
            }
            _ => {
                return Err(PeerError::Extension("invalid bencode".into()));
            }
        }
    }

    Err(PeerError::Extension("unterminated dict".into()))
}

/// Collects metadata pieces and verifies the assembled bytes against the
/// magnet's info hash.
pub struct MetadataBuffer {
    info_hash: InfoHash,
    total_size: usize,
    pieces: Vec<Option<Bytes>>,
}

impl MetadataBuffer {
    pub fn new(info_hash: InfoHash, total_size: usize) -> Result<Self, PeerError> {
        if total_size == 0 || total_size > MAX_METADATA_SIZE {
            return Err(PeerError::Extension(format!(
                "implausible metadata size: {}",
                total_size
            )));
        }
        let piece_count = total_size.div_ceil(METADATA_PIECE_SIZE);
        Ok(Self {
            info_hash,
            total_size,
            pieces: vec![None; piece_count],
        })
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Returns the lowest missing piece index, or `None` when all pieces
    /// have arrived.
    pub fn next_missing(&self) -> Option<u32> {
        self.pieces
            .iter()
            .position(|p| p.is_none())
            .map(|i| i as u32)
    }

    /// Stores a received piece. Every piece is 16 KiB except the last.
    pub fn insert(&mut self, piece: u32, data: Bytes) -> Result<(), PeerError> {
        let index = piece as usize;
        if index >= self.pieces.len() {
            return Err(PeerError::Extension("piece index out of range".into()));
        }

        let offset = index * METADATA_PIECE_SIZE;
        let expected = (self.total_size - offset).min(METADATA_PIECE_SIZE);
        if data.len() != expected {
            return Err(PeerError::Extension("metadata piece size mismatch".into()));
        }

        self.pieces[index] = Some(data);
        Ok(())
    }

    /// Concatenates the pieces and verifies their SHA-1 against the info
    /// hash.
    pub fn finish(self) -> Result<Bytes, PeerError> {
        let mut raw = Vec::with_capacity(self.total_size);
        for piece in &self.pieces {
            match piece {
                Some(data) => raw.extend_from_slice(data),
                None => return Err(PeerError::Extension("metadata incomplete".into())),
            }
        }

        let mut hasher = Sha1::new();
        hasher.update(&raw);
        let digest: [u8; 20] = hasher.finalize().into();

        if &digest != self.info_hash.as_bytes() {
            return Err(PeerError::Extension("metadata hash mismatch".into()));
        }

        Ok(Bytes::from(raw))
    }
}

/// Downloads the raw `info` dictionary from a single peer.
///
/// Runs the base handshake with the extension bit, exchanges extended
/// handshakes, then requests metadata pieces one at a time (the piece count
/// is small, so stop-and-wait is fast enough). Peers that lack the
/// extension, reject a request, or serve bytes that do not hash to
/// `info_hash` yield an error and are abandoned by the caller.
pub async fn fetch_metadata_from_peer(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: [u8; 20],
) -> Result<Bytes, PeerError> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout)??;

    let mut machine =
        WireMachine::new(info_hash, peer_id, None).with_frame_cap(METADATA_FRAME_CAP);

    let handshake =
        ExtensionHandshake::with_extensions(&[(UT_METADATA, LOCAL_UT_METADATA_ID)]);
    machine.send(&Message::Extended {
        id: EXTENSION_HANDSHAKE_ID,
        payload: handshake.encode()?,
    });

    let mut peer_ut_metadata: Option<u8> = None;
    let mut buffer: Option<MetadataBuffer> = None;
    let mut read_buf = vec![0u8; 16 * 1024];

    loop {
        if let Some(out) = machine.take_outbound() {
            stream.write_all(&out).await?;
        }

        while let Some(event) = machine.poll()? {
            match event {
                WireEvent::Handshake { extensions, .. } => {
                    if !extensions {
                        return Err(PeerError::Extension(
                            "peer does not support the extension protocol".into(),
                        ));
                    }
                }
                WireEvent::Message(Message::Extended { id, payload })
                    if id == EXTENSION_HANDSHAKE_ID =>
                {
                    let theirs = ExtensionHandshake::decode(&payload)?;
                    let ut_id = theirs.extension_id(UT_METADATA).ok_or_else(|| {
                        PeerError::Extension("peer does not support ut_metadata".into())
                    })?;
                    let size = theirs.metadata_size.filter(|&s| s > 0).ok_or_else(|| {
                        PeerError::Extension("peer did not announce metadata_size".into())
                    })?;

                    let fresh = MetadataBuffer::new(info_hash, size as usize)?;
                    machine.send(&Message::Extended {
                        id: ut_id,
                        payload: MetadataMessage::request(0).encode()?,
                    });
                    peer_ut_metadata = Some(ut_id);
                    buffer = Some(fresh);
                }
                WireEvent::Message(Message::Extended { id, payload })
                    if id == LOCAL_UT_METADATA_ID =>
                {
                    let message = MetadataMessage::decode(&payload)?;
                    let (Some(buf), Some(ut_id)) = (buffer.as_mut(), peer_ut_metadata) else {
                        return Err(PeerError::Extension(
                            "metadata message before handshake".into(),
                        ));
                    };

                    match message.msg_type {
                        MetadataMessageType::Data => {
                            let data = message
                                .data
                                .ok_or_else(|| PeerError::Extension("empty data".into()))?;
                            buf.insert(message.piece, data)?;

                            if let Some(next) = buf.next_missing() {
                                machine.send(&Message::Extended {
                                    id: ut_id,
                                    payload: MetadataMessage::request(next).encode()?,
                                });
                            } else if let Some(complete) = buffer.take() {
                                return complete.finish();
                            }
                        }
                        MetadataMessageType::Reject => {
                            return Err(PeerError::Extension(
                                "peer rejected metadata request".into(),
                            ));
                        }
                        MetadataMessageType::Request => {
                            // We never announced metadata to serve; ignore.
                        }
                    }
                }
                // Bitfields, haves, and other swarm chatter are irrelevant
                // while bootstrapping metadata.
                WireEvent::Message(_) => {}
            }
        }

        if let Some(out) = machine.take_outbound() {
            stream.write_all(&out).await?;
        }

        let n = timeout(MESSAGE_TIMEOUT, stream.read(&mut read_buf))
            .await
            .map_err(|_| PeerError::Timeout)??;
        if n == 0 {
            machine.on_eof()?;
            return Err(PeerError::ConnectionClosed);
        }
        machine.feed(&read_buf[..n]);
    }
}
