//! Per-peer download session.
//!
//! A session owns one TCP connection and drives the Sans-I/O wire machine
//! over it: handshake, availability tracking, a pipelined request window
//! fed from the piece registry, and the timers the protocol expects
//! (keepalives after two minutes of outbound silence, disconnect after two
//! minutes of inbound silence). Any error tears the session down; the
//! supervisor releases its reservations and dials a replacement peer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};

use super::error::PeerError;
use super::message::Message;
use super::peer_id::PeerId;
use super::wire::{WireEvent, WireMachine};
use crate::metainfo::Metainfo;
use crate::registry::{BlockSpec, Delivered, PeerKey, RegistryHandle};

/// Tunables for a peer session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cap on outstanding block requests (the pipeline depth).
    pub max_requests: usize,
    pub connect_timeout: Duration,
    /// Send a keepalive after this much outbound silence.
    pub keepalive_interval: Duration,
    /// Close the connection after this much inbound silence.
    pub idle_timeout: Duration,
    /// How long a choke may last before the session returns its
    /// reservations to the registry.
    pub choke_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(120),
            choke_grace: Duration::from_secs(10),
        }
    }
}

/// Runs one peer session to completion.
///
/// The caller registers the peer with the registry beforehand and releases
/// it afterwards, so cleanup also happens when this future is cancelled.
pub async fn run_session(
    addr: SocketAddr,
    meta: Arc<Metainfo>,
    peer_id: PeerId,
    registry: RegistryHandle,
    key: PeerKey,
    mut hints: mpsc::UnboundedReceiver<BlockSpec>,
    config: SessionConfig,
) -> Result<(), PeerError> {
    let mut stream = timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout)??;

    let mut machine = WireMachine::new(
        meta.info_hash,
        *peer_id.as_bytes(),
        Some(meta.piece_count()),
    );

    // Requests in flight at the peer, keyed by (piece, begin).
    let mut outstanding: HashSet<(u32, u32)> = HashSet::new();
    let mut hints_open = true;
    let mut established = false;
    let mut choked = true;
    let mut choked_since: Option<Instant> = None;
    let mut released_while_choked = false;
    let mut last_write = Instant::now();

    let mut tick = tokio::time::interval(Duration::from_secs(5));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut read_buf = vec![0u8; 16 * 1024];

    loop {
        while let Some(event) = machine.poll()? {
            match event {
                WireEvent::Handshake { .. } => {
                    established = true;
                    let ours = registry.our_bitfield().await?;
                    if !ours.is_empty() {
                        machine.send(&Message::Bitfield(ours.to_bytes()));
                    }
                    machine.send(&Message::Interested);
                }
                WireEvent::Message(message) => match message {
                    Message::KeepAlive => {}
                    Message::Choke => {
                        choked = true;
                        choked_since = Some(Instant::now());
                    }
                    Message::Unchoke => {
                        choked = false;
                        choked_since = None;
                    }
                    Message::Have { piece } => registry.have(key, piece),
                    Message::Bitfield(bits) => registry.set_bitfield(key, bits),
                    Message::Piece { index, begin, data } => {
                        outstanding.remove(&(index, begin));
                        if let Delivered::HashMismatch { piece } =
                            registry.deliver(key, index, begin, data).await?
                        {
                            return Err(PeerError::BadPieceData(piece));
                        }
                    }
                    // We never unchoke anyone, so requests are not served.
                    Message::Request { .. } | Message::Cancel { .. } => {}
                    Message::Interested | Message::NotInterested => {}
                    Message::Extended { .. } => {}
                },
            }
        }

        if established && !choked {
            released_while_choked = false;
            while outstanding.len() < config.max_requests {
                match registry.reserve(key).await? {
                    Some(block) => {
                        outstanding.insert((block.piece, block.offset));
                        machine.send(&Message::Request {
                            index: block.piece,
                            begin: block.offset,
                            length: block.length,
                        });
                    }
                    None => break,
                }
            }
        }

        if let Some(out) = machine.take_outbound() {
            stream.write_all(&out).await?;
            last_write = Instant::now();
        }

        tokio::select! {
            read = timeout(config.idle_timeout, stream.read(&mut read_buf)) => {
                let n = read.map_err(|_| PeerError::Timeout)??;
                if n == 0 {
                    machine.on_eof()?;
                    return Err(PeerError::ConnectionClosed);
                }
                machine.feed(&read_buf[..n]);
            }
            hint = hints.recv(), if hints_open => {
                // The registry got this block from someone else; withdraw
                // our request.
                match hint {
                    Some(block) => {
                        if outstanding.remove(&(block.piece, block.offset)) {
                            machine.send(&Message::Cancel {
                                index: block.piece,
                                begin: block.offset,
                                length: block.length,
                            });
                        }
                    }
                    None => hints_open = false,
                }
            }
            _ = tick.tick() => {
                if established && last_write.elapsed() >= config.keepalive_interval {
                    machine.send(&Message::KeepAlive);
                }
                if choked && !released_while_choked {
                    if let Some(since) = choked_since {
                        if since.elapsed() >= config.choke_grace {
                            registry.release_requests(key);
                            outstanding.clear();
                            released_while_choked = true;
                        }
                    }
                }
            }
        }
    }
}
