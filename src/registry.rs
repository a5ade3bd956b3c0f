//! The piece registry: central download coordination.
//!
//! One task owns all piece and block state; peer sessions talk to it through
//! a [`RegistryHandle`] carrying commands over a channel, which makes
//! `reserve` and `deliver` linearizable without locks. The registry tracks
//! which pieces each connected peer has, hands out blocks rarest-piece-first,
//! verifies completed pieces against their SHA-1 digest, forwards verified
//! pieces to the file writer, and — in endgame — duplicates the last
//! outstanding blocks across peers, cancelling the losers on first delivery.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::metainfo::{Metainfo, BLOCK_SIZE};
use crate::peer::{Bitfield, PeerError};

/// Identifier the registry assigns to each connected peer session.
///
/// Sessions are identified by this key, not by the peer id bytes from the
/// wire handshake, which are not trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey(u64);

/// A block to request from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSpec {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

/// Outcome of delivering a block payload, as seen by the delivering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Recorded; the piece still has missing blocks.
    Progress,
    /// The block completed its piece and the SHA-1 matched.
    Complete { piece: u32 },
    /// The piece completed but failed verification. All of its blocks were
    /// discarded and the deliverer should be dropped.
    HashMismatch { piece: u32 },
    /// Duplicate, unsolicited, or malformed block; ignored.
    Stale,
}

/// The registry task has shut down (the download is over).
#[derive(Debug, Error)]
#[error("piece registry closed")]
pub struct RegistryClosed;

impl From<RegistryClosed> for PeerError {
    fn from(_: RegistryClosed) -> Self {
        PeerError::ConnectionClosed
    }
}

enum PieceState {
    Absent,
    InFlight(InFlightPiece),
    Complete,
}

struct InFlightPiece {
    data: BytesMut,
    received: Vec<bool>,
    received_count: u32,
    /// Per block, the peers currently holding a reservation for it. More
    /// than one entry only happens in endgame.
    requested: Vec<Vec<PeerKey>>,
}

impl InFlightPiece {
    fn new(piece_size: usize, block_count: u32) -> Self {
        Self {
            data: BytesMut::zeroed(piece_size),
            received: vec![false; block_count as usize],
            received_count: 0,
            requested: vec![Vec::new(); block_count as usize],
        }
    }

    fn has_unrequested_block(&self) -> bool {
        self.received
            .iter()
            .zip(&self.requested)
            .any(|(received, requested)| !received && requested.is_empty())
    }
}

struct PeerEntry {
    bitfield: Bitfield,
    hints: mpsc::UnboundedSender<BlockSpec>,
}

enum DeliverOutcome {
    Progress,
    Complete { piece: u32, data: Bytes },
    HashMismatch { piece: u32 },
    Stale,
}

struct PieceRegistry {
    meta: Arc<Metainfo>,
    states: Vec<PieceState>,
    /// Holder count per piece across currently connected peers.
    availability: Vec<u32>,
    in_flight: BTreeSet<u32>,
    peers: HashMap<PeerKey, PeerEntry>,
    next_key: u64,
    absent_count: usize,
    complete_count: usize,
    /// Blocks not yet received across all in-flight pieces.
    unsatisfied_blocks: u64,
    /// Endgame starts when no Absent piece remains and at most this many
    /// blocks are unsatisfied: one full piece's worth.
    endgame_threshold: u64,
}

impl PieceRegistry {
    fn new(meta: Arc<Metainfo>, seeded: &[u32]) -> Self {
        let piece_count = meta.piece_count();
        let mut states: Vec<PieceState> = (0..piece_count).map(|_| PieceState::Absent).collect();

        let mut complete_count = 0;
        for &index in seeded {
            if let Some(state @ PieceState::Absent) = states.get_mut(index as usize) {
                *state = PieceState::Complete;
                complete_count += 1;
            }
        }

        let endgame_threshold = meta.piece_length.div_ceil(BLOCK_SIZE as u64);

        Self {
            states,
            availability: vec![0; piece_count],
            in_flight: BTreeSet::new(),
            peers: HashMap::new(),
            next_key: 0,
            absent_count: piece_count - complete_count,
            complete_count,
            unsatisfied_blocks: 0,
            endgame_threshold,
            meta,
        }
    }

    fn register(&mut self, hints: mpsc::UnboundedSender<BlockSpec>) -> PeerKey {
        let key = PeerKey(self.next_key);
        self.next_key += 1;
        self.peers.insert(
            key,
            PeerEntry {
                bitfield: Bitfield::new(self.meta.piece_count()),
                hints,
            },
        );
        key
    }

    fn set_bitfield(&mut self, key: PeerKey, bits: &[u8]) {
        let piece_count = self.meta.piece_count();
        let Some(entry) = self.peers.get_mut(&key) else {
            return;
        };

        let new = Bitfield::from_bytes(bits, piece_count);
        for i in 0..piece_count {
            if new.has_piece(i) && !entry.bitfield.has_piece(i) {
                self.availability[i] += 1;
            }
        }
        entry.bitfield = new;
    }

    fn add_have(&mut self, key: PeerKey, piece: u32) {
        let index = piece as usize;
        if index >= self.meta.piece_count() {
            return;
        }
        if let Some(entry) = self.peers.get_mut(&key) {
            if !entry.bitfield.has_piece(index) {
                entry.bitfield.set_piece(index);
                self.availability[index] += 1;
            }
        }
    }

    fn in_endgame(&self) -> bool {
        self.absent_count == 0 && self.unsatisfied_blocks <= self.endgame_threshold
    }

    fn reserve(&mut self, key: PeerKey) -> Option<BlockSpec> {
        let bitfield = self.peers.get(&key)?.bitfield.clone();

        // Prefer pieces already in flight, so they finish quickly. Rarest
        // first, ties broken by the lowest index.
        let mut candidate: Option<(u32, u32)> = None;
        for &piece in &self.in_flight {
            if !bitfield.has_piece(piece as usize) {
                continue;
            }
            let PieceState::InFlight(state) = &self.states[piece as usize] else {
                continue;
            };
            if state.has_unrequested_block() {
                let rank = (self.availability[piece as usize], piece);
                if candidate.is_none_or(|best| rank < best) {
                    candidate = Some(rank);
                }
            }
        }
        if let Some((_, piece)) = candidate {
            return self.reserve_block_in(piece, key);
        }

        // Nothing in flight for this peer: promote the rarest Absent piece
        // it has and hand out that piece's first block.
        let mut candidate: Option<(u32, u32)> = None;
        for index in 0..self.meta.piece_count() {
            if !matches!(self.states[index], PieceState::Absent) {
                continue;
            }
            if !bitfield.has_piece(index) {
                continue;
            }
            let rank = (self.availability[index], index as u32);
            if candidate.is_none_or(|best| rank < best) {
                candidate = Some(rank);
            }
        }
        if let Some((_, piece)) = candidate {
            self.promote(piece);
            return self.reserve_block_in(piece, key);
        }

        // Endgame: duplicate an outstanding block, but never hand the same
        // block to the same peer twice.
        if self.in_endgame() {
            for &piece in &self.in_flight {
                if !bitfield.has_piece(piece as usize) {
                    continue;
                }
                let PieceState::InFlight(state) = &self.states[piece as usize] else {
                    continue;
                };
                for (block, received) in state.received.iter().enumerate() {
                    if !received && !state.requested[block].contains(&key) {
                        return self.reserve_block_at(piece, block as u32, key);
                    }
                }
            }
        }

        None
    }

    fn promote(&mut self, piece: u32) {
        let piece_size = self.meta.piece_size(piece) as usize;
        let block_count = self.meta.block_count(piece);
        self.states[piece as usize] = PieceState::InFlight(InFlightPiece::new(
            piece_size,
            block_count,
        ));
        self.in_flight.insert(piece);
        self.absent_count -= 1;
        self.unsatisfied_blocks += block_count as u64;
    }

    // Hands out the lowest-offset block of `piece` that nobody has requested.
    fn reserve_block_in(&mut self, piece: u32, key: PeerKey) -> Option<BlockSpec> {
        let PieceState::InFlight(state) = &self.states[piece as usize] else {
            return None;
        };
        let block = state
            .received
            .iter()
            .zip(&state.requested)
            .position(|(received, requested)| !received && requested.is_empty())?;
        self.reserve_block_at(piece, block as u32, key)
    }

    fn reserve_block_at(&mut self, piece: u32, block: u32, key: PeerKey) -> Option<BlockSpec> {
        let offset = block * BLOCK_SIZE;
        let length = self.meta.block_size(piece, offset);
        let PieceState::InFlight(state) = &mut self.states[piece as usize] else {
            return None;
        };
        state.requested[block as usize].push(key);
        Some(BlockSpec {
            piece,
            offset,
            length,
        })
    }

    fn deliver(&mut self, key: PeerKey, piece: u32, begin: u32, data: Bytes) -> DeliverOutcome {
        let index = piece as usize;
        if index >= self.states.len()
            || begin % BLOCK_SIZE != 0
            || begin as u64 >= self.meta.piece_size(piece)
            || data.len() != self.meta.block_size(piece, begin) as usize
        {
            return DeliverOutcome::Stale;
        }

        let block = (begin / BLOCK_SIZE) as usize;
        let block_count = self.meta.block_count(piece);

        let PieceState::InFlight(state) = &mut self.states[index] else {
            // Complete pieces see duplicates in endgame; Absent pieces see
            // blocks released before arrival. Both are harmless.
            return DeliverOutcome::Stale;
        };

        if state.received[block] {
            return DeliverOutcome::Stale;
        }

        state.received[block] = true;
        state.received_count += 1;
        state.data[begin as usize..begin as usize + data.len()].copy_from_slice(&data);
        self.unsatisfied_blocks -= 1;

        // Everyone else still holding this block gets a cancel hint.
        let losers = std::mem::take(&mut state.requested[block]);
        let length = data.len() as u32;
        let complete = state.received_count == block_count;
        for loser in losers {
            if loser != key {
                if let Some(entry) = self.peers.get(&loser) {
                    let _ = entry.hints.send(BlockSpec {
                        piece,
                        offset: begin,
                        length,
                    });
                }
            }
        }

        if !complete {
            return DeliverOutcome::Progress;
        }

        let PieceState::InFlight(state) = &mut self.states[index] else {
            unreachable!("checked above");
        };

        let mut hasher = Sha1::new();
        hasher.update(&state.data);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest != self.meta.pieces[index] {
            tracing::debug!(piece, "piece failed verification, discarding blocks");
            // Revert to a fresh InFlight piece; every block must be fetched
            // again.
            *state = InFlightPiece::new(self.meta.piece_size(piece) as usize, block_count);
            self.unsatisfied_blocks += block_count as u64;
            return DeliverOutcome::HashMismatch { piece };
        }

        let data = std::mem::take(&mut state.data).freeze();
        self.states[index] = PieceState::Complete;
        self.in_flight.remove(&piece);
        self.complete_count += 1;
        tracing::debug!(
            piece,
            complete = self.complete_count,
            total = self.meta.piece_count(),
            "piece verified"
        );
        DeliverOutcome::Complete { piece, data }
    }

    // Reverts every reservation `key` holds. In-flight pieces left with no
    // received blocks and no reservations fall back to Absent.
    fn release_requests(&mut self, key: PeerKey) {
        let mut demote = Vec::new();
        for &piece in &self.in_flight {
            let PieceState::InFlight(state) = &mut self.states[piece as usize] else {
                continue;
            };
            for requested in &mut state.requested {
                requested.retain(|&k| k != key);
            }
            if state.received_count == 0 && state.requested.iter().all(|r| r.is_empty()) {
                demote.push(piece);
            }
        }
        for piece in demote {
            let block_count = self.meta.block_count(piece) as u64;
            self.states[piece as usize] = PieceState::Absent;
            self.in_flight.remove(&piece);
            self.absent_count += 1;
            self.unsatisfied_blocks -= block_count;
        }
    }

    fn release(&mut self, key: PeerKey) {
        self.release_requests(key);
        if let Some(entry) = self.peers.remove(&key) {
            for i in 0..self.meta.piece_count() {
                if entry.bitfield.has_piece(i) {
                    self.availability[i] -= 1;
                }
            }
        }
    }

    fn our_bitfield(&self) -> Bitfield {
        let mut bitfield = Bitfield::new(self.meta.piece_count());
        for (i, state) in self.states.iter().enumerate() {
            if matches!(state, PieceState::Complete) {
                bitfield.set_piece(i);
            }
        }
        bitfield
    }
}

enum Command {
    Register {
        hints: mpsc::UnboundedSender<BlockSpec>,
        reply: oneshot::Sender<PeerKey>,
    },
    SetBitfield {
        key: PeerKey,
        bits: Bytes,
    },
    Have {
        key: PeerKey,
        piece: u32,
    },
    Reserve {
        key: PeerKey,
        reply: oneshot::Sender<Option<BlockSpec>>,
    },
    Deliver {
        key: PeerKey,
        piece: u32,
        begin: u32,
        data: Bytes,
        reply: oneshot::Sender<Delivered>,
    },
    ReleaseRequests {
        key: PeerKey,
    },
    Release {
        key: PeerKey,
    },
    OurBitfield {
        reply: oneshot::Sender<Bitfield>,
    },
    Progress {
        reply: oneshot::Sender<(usize, usize)>,
    },
}

/// Handle to the registry actor. Cheap to clone; every operation is a
/// message to the owning task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RegistryHandle {
    /// Spawns the registry task.
    ///
    /// `seeded` pieces (from resume verification) start out Complete.
    /// Verified pieces are forwarded to `completed` for the file writer.
    pub fn spawn(
        meta: Arc<Metainfo>,
        completed: mpsc::Sender<(u32, Bytes)>,
        seeded: &[u32],
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = PieceRegistry::new(meta, seeded);
        tokio::spawn(run(registry, rx, completed));
        Self { tx }
    }

    /// Registers a session; returns its key and the channel on which the
    /// registry delivers endgame cancel hints.
    pub async fn register(
        &self,
    ) -> Result<(PeerKey, mpsc::UnboundedReceiver<BlockSpec>), RegistryClosed> {
        let (hints_tx, hints_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Register {
                hints: hints_tx,
                reply,
            })
            .map_err(|_| RegistryClosed)?;
        let key = rx.await.map_err(|_| RegistryClosed)?;
        Ok((key, hints_rx))
    }

    /// Replaces the peer's availability with a full bitfield.
    pub fn set_bitfield(&self, key: PeerKey, bits: Bytes) {
        let _ = self.tx.send(Command::SetBitfield { key, bits });
    }

    /// Marks one more piece as held by the peer.
    pub fn have(&self, key: PeerKey, piece: u32) {
        let _ = self.tx.send(Command::Have { key, piece });
    }

    /// Returns a block to request from this peer, or `None` if it has
    /// nothing we need right now.
    pub async fn reserve(&self, key: PeerKey) -> Result<Option<BlockSpec>, RegistryClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reserve { key, reply })
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }

    /// Records a received block payload.
    pub async fn deliver(
        &self,
        key: PeerKey,
        piece: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<Delivered, RegistryClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Deliver {
                key,
                piece,
                begin,
                data,
                reply,
            })
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }

    /// Reverts the peer's reservations but keeps it connected (choke grace).
    pub fn release_requests(&self, key: PeerKey) {
        let _ = self.tx.send(Command::ReleaseRequests { key });
    }

    /// Removes the peer entirely, reverting its reservations and
    /// availability contribution.
    pub fn release(&self, key: PeerKey) {
        let _ = self.tx.send(Command::Release { key });
    }

    /// The bitfield of verified pieces.
    pub async fn our_bitfield(&self) -> Result<Bitfield, RegistryClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::OurBitfield { reply })
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }

    /// `(complete, total)` piece counts.
    pub async fn progress(&self) -> Result<(usize, usize), RegistryClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Progress { reply })
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }
}

async fn run(
    mut registry: PieceRegistry,
    mut rx: mpsc::UnboundedReceiver<Command>,
    completed: mpsc::Sender<(u32, Bytes)>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { hints, reply } => {
                let _ = reply.send(registry.register(hints));
            }
            Command::SetBitfield { key, bits } => registry.set_bitfield(key, &bits),
            Command::Have { key, piece } => registry.add_have(key, piece),
            Command::Reserve { key, reply } => {
                let _ = reply.send(registry.reserve(key));
            }
            Command::Deliver {
                key,
                piece,
                begin,
                data,
                reply,
            } => match registry.deliver(key, piece, begin, data) {
                DeliverOutcome::Progress => {
                    let _ = reply.send(Delivered::Progress);
                }
                DeliverOutcome::Stale => {
                    let _ = reply.send(Delivered::Stale);
                }
                DeliverOutcome::HashMismatch { piece } => {
                    let _ = reply.send(Delivered::HashMismatch { piece });
                }
                DeliverOutcome::Complete { piece, data } => {
                    let _ = reply.send(Delivered::Complete { piece });
                    // Backpressure from the writer is deliberate: if disk
                    // writes fall behind, the registry stops accepting work.
                    if completed.send((piece, data)).await.is_err() {
                        break;
                    }
                }
            },
            Command::ReleaseRequests { key } => registry.release_requests(key),
            Command::Release { key } => registry.release(key),
            Command::OurBitfield { reply } => {
                let _ = reply.send(registry.our_bitfield());
            }
            Command::Progress { reply } => {
                let _ = reply.send((registry.complete_count, registry.meta.piece_count()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sha1::{Digest, Sha1};

    use super::*;

    // Builds a single-file metainfo whose piece hashes match `payload`.
    fn test_meta(piece_length: usize, payload: &[u8]) -> Arc<Metainfo> {
        let mut pieces = Vec::new();
        for chunk in payload.chunks(piece_length) {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            let digest: [u8; 20] = hasher.finalize().into();
            pieces.extend_from_slice(&digest);
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(format!("d6:lengthi{}e", payload.len()).as_bytes());
        raw.extend_from_slice(b"4:name4:data");
        raw.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
        raw.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        raw.extend_from_slice(&pieces);
        raw.extend_from_slice(b"e");

        Arc::new(Metainfo::from_raw_info(&raw, Vec::new()).unwrap())
    }

    fn hint_channel() -> (
        mpsc::UnboundedSender<BlockSpec>,
        mpsc::UnboundedReceiver<BlockSpec>,
    ) {
        mpsc::unbounded_channel()
    }

    fn full_bitfield(registry: &mut PieceRegistry, key: PeerKey) {
        let mut bits = Bitfield::new(registry.meta.piece_count());
        for i in 0..registry.meta.piece_count() {
            bits.set_piece(i);
        }
        registry.set_bitfield(key, bits.as_bytes());
    }

    #[test]
    fn test_blocks_handed_out_in_ascending_offset() {
        // One piece of 48 KiB: three blocks.
        let payload = vec![7u8; 49152];
        let registry_meta = test_meta(49152, &payload);
        let mut registry = PieceRegistry::new(registry_meta, &[]);

        let (hints, _rx) = hint_channel();
        let key = registry.register(hints);
        full_bitfield(&mut registry, key);

        let offsets: Vec<u32> = (0..3)
            .map(|_| registry.reserve(key).unwrap().offset)
            .collect();
        assert_eq!(offsets, vec![0, 16384, 32768]);
        assert!(registry.reserve(key).is_none());
    }

    #[test]
    fn test_one_reservation_per_block_outside_endgame() {
        // Two pieces, two blocks each: no duplicates while work remains.
        let payload = vec![1u8; 65536];
        let meta = test_meta(32768, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints_a, _ra) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);
        full_bitfield(&mut registry, a);
        full_bitfield(&mut registry, b);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let spec = registry.reserve(a).unwrap();
            assert!(seen.insert((spec.piece, spec.offset)));
        }
        for _ in 0..2 {
            let spec = registry.reserve(b).unwrap();
            assert!(seen.insert((spec.piece, spec.offset)));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_promotes_rarest_piece_first() {
        let payload = vec![3u8; 32768];
        let meta = test_meta(16384, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints_a, _ra) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);

        // Piece 0 has two holders, piece 1 only one: piece 1 is rarer.
        full_bitfield(&mut registry, a);
        let mut bits = Bitfield::new(2);
        bits.set_piece(0);
        registry.set_bitfield(b, bits.as_bytes());

        let spec = registry.reserve(a).unwrap();
        assert_eq!(spec.piece, 1);
    }

    #[test]
    fn test_prefers_in_flight_over_absent() {
        let payload = vec![9u8; 65536];
        let meta = test_meta(32768, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints_a, _ra) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);
        full_bitfield(&mut registry, a);
        full_bitfield(&mut registry, b);

        // A starts piece 0; B should help finish it rather than open piece 1.
        let first = registry.reserve(a).unwrap();
        let second = registry.reserve(b).unwrap();
        assert_eq!(first.piece, second.piece);
        assert_ne!(first.offset, second.offset);
    }

    #[test]
    fn test_deliver_completes_and_verifies() {
        let payload: Vec<u8> = (0..40960u32).map(|i| (i % 251) as u8).collect();
        let meta = test_meta(16384, &payload);
        let mut registry = PieceRegistry::new(meta.clone(), &[]);

        let (hints, _rx) = hint_channel();
        let key = registry.register(hints);
        full_bitfield(&mut registry, key);

        let mut complete = Vec::new();
        while let Some(spec) = registry.reserve(key) {
            let start = spec.piece as usize * 16384 + spec.offset as usize;
            let data = Bytes::copy_from_slice(&payload[start..start + spec.length as usize]);
            match registry.deliver(key, spec.piece, spec.offset, data) {
                DeliverOutcome::Complete { piece, data } => {
                    let begin = piece as usize * 16384;
                    assert_eq!(&payload[begin..begin + data.len()], &data[..]);
                    complete.push(piece);
                }
                DeliverOutcome::Progress => {}
                _ => panic!("unexpected delivery outcome"),
            }
        }

        complete.sort_unstable();
        assert_eq!(complete, vec![0, 1, 2]);
        assert!(registry.our_bitfield().is_complete());
    }

    #[test]
    fn test_hash_mismatch_reverts_piece() {
        let payload = vec![5u8; 16384];
        let meta = test_meta(16384, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints_a, _ra) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);
        full_bitfield(&mut registry, a);
        full_bitfield(&mut registry, b);

        let spec = registry.reserve(a).unwrap();
        let garbage = Bytes::from(vec![0u8; spec.length as usize]);
        assert!(matches!(
            registry.deliver(a, spec.piece, spec.offset, garbage),
            DeliverOutcome::HashMismatch { piece: 0 }
        ));

        // The piece reverted with zero received blocks; another peer can
        // complete it with the real bytes.
        registry.release(a);
        let spec = registry.reserve(b).unwrap();
        assert_eq!((spec.piece, spec.offset), (0, 0));
        let good = Bytes::copy_from_slice(&payload);
        assert!(matches!(
            registry.deliver(b, spec.piece, spec.offset, good),
            DeliverOutcome::Complete { piece: 0, .. }
        ));
    }

    #[test]
    fn test_endgame_duplicates_and_cancels() {
        // 120 pieces of one block each; everything but the last is seeded.
        let piece_length = 16384;
        let payload: Vec<u8> = (0..120 * piece_length).map(|i| (i % 127) as u8).collect();
        let meta = test_meta(piece_length, &payload);
        let seeded: Vec<u32> = (0..119).collect();
        let mut registry = PieceRegistry::new(meta, &seeded);

        let (hints_a, mut hints_a_rx) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);
        full_bitfield(&mut registry, a);
        full_bitfield(&mut registry, b);

        // A reserves the only outstanding block; B gets the same block
        // because endgame allows duplication.
        let first = registry.reserve(a).unwrap();
        assert_eq!(first.piece, 119);
        let second = registry.reserve(b).unwrap();
        assert_eq!((second.piece, second.offset), (first.piece, first.offset));

        // But never the same block to the same peer twice.
        assert!(registry.reserve(b).is_none());

        // B wins the race; A is told to cancel; the piece completes.
        let start = 119 * piece_length;
        let data = Bytes::copy_from_slice(&payload[start..start + piece_length]);
        assert!(matches!(
            registry.deliver(b, 119, 0, data.clone()),
            DeliverOutcome::Complete { piece: 119, .. }
        ));
        let hint = hints_a_rx.try_recv().unwrap();
        assert_eq!((hint.piece, hint.offset), (119, 0));

        // A's late duplicate is tolerated.
        assert!(matches!(
            registry.deliver(a, 119, 0, data),
            DeliverOutcome::Stale
        ));
    }

    #[test]
    fn test_release_reverts_reservations() {
        let payload = vec![2u8; 32768];
        let meta = test_meta(32768, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints_a, _ra) = hint_channel();
        let (hints_b, _rb) = hint_channel();
        let a = registry.register(hints_a);
        let b = registry.register(hints_b);
        full_bitfield(&mut registry, a);
        full_bitfield(&mut registry, b);

        let taken = registry.reserve(a).unwrap();
        registry.reserve(a); // second block of the same piece
        registry.release(a);

        // With A gone and no data received, the piece fell back to Absent
        // and B can start it from the first block.
        assert_eq!(registry.absent_count, 1);
        let spec = registry.reserve(b).unwrap();
        assert_eq!((spec.piece, spec.offset), (taken.piece, 0));
    }

    #[test]
    fn test_duplicate_delivery_is_stale() {
        let payload = vec![8u8; 32768];
        let meta = test_meta(32768, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints, _rx) = hint_channel();
        let key = registry.register(hints);
        full_bitfield(&mut registry, key);

        let spec = registry.reserve(key).unwrap();
        let data = Bytes::copy_from_slice(&payload[..spec.length as usize]);
        assert!(matches!(
            registry.deliver(key, spec.piece, spec.offset, data.clone()),
            DeliverOutcome::Progress
        ));
        assert!(matches!(
            registry.deliver(key, spec.piece, spec.offset, data),
            DeliverOutcome::Stale
        ));
    }

    #[test]
    fn test_malformed_delivery_is_stale() {
        let payload = vec![4u8; 16384];
        let meta = test_meta(16384, &payload);
        let mut registry = PieceRegistry::new(meta, &[]);

        let (hints, _rx) = hint_channel();
        let key = registry.register(hints);
        full_bitfield(&mut registry, key);
        registry.reserve(key).unwrap();

        // Misaligned offset and wrong length are both ignored.
        let data = Bytes::from(vec![0u8; 10]);
        assert!(matches!(
            registry.deliver(key, 0, 3, data.clone()),
            DeliverOutcome::Stale
        ));
        assert!(matches!(
            registry.deliver(key, 0, 0, data),
            DeliverOutcome::Stale
        ));
    }

    #[test]
    fn test_seeded_pieces_start_complete() {
        let payload = vec![6u8; 49152];
        let meta = test_meta(16384, &payload);
        let registry = PieceRegistry::new(meta, &[0, 2]);

        let ours = registry.our_bitfield();
        assert!(ours.has_piece(0));
        assert!(!ours.has_piece(1));
        assert!(ours.has_piece(2));
        assert_eq!(registry.complete_count, 2);
        assert_eq!(registry.absent_count, 1);
    }
}
