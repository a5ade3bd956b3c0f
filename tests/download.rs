//! End-to-end download tests against a scripted in-process peer.
//!
//! A minimal seeder speaks the server side of the peer wire protocol over
//! a real TCP socket: handshake, full bitfield, unchoke, and a piece
//! message for every request. The client under test connects to it through
//! the normal supervisor path, with no trackers involved.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use swell::client::{download_with_peers, Config};
use swell::metainfo::Metainfo;
use swell::peer::{Bitfield, Handshake, Message, PeerId};
use swell::storage::{sidecar_path, ResumeData};

fn piece_hashes(payload: &[u8], piece_length: usize) -> Vec<u8> {
    let mut hashes = Vec::new();
    for chunk in payload.chunks(piece_length) {
        let mut hasher = Sha1::new();
        hasher.update(chunk);
        let digest: [u8; 20] = hasher.finalize().into();
        hashes.extend_from_slice(&digest);
    }
    hashes
}

fn single_file_meta(name: &str, payload: &[u8], piece_length: usize) -> Arc<Metainfo> {
    let hashes = piece_hashes(payload, piece_length);
    let mut raw = Vec::new();
    raw.extend_from_slice(format!("d6:lengthi{}e", payload.len()).as_bytes());
    raw.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
    raw.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    raw.extend_from_slice(format!("6:pieces{}:", hashes.len()).as_bytes());
    raw.extend_from_slice(&hashes);
    raw.extend_from_slice(b"e");
    Arc::new(Metainfo::from_raw_info(&raw, Vec::new()).unwrap())
}

fn two_file_meta(payload: &[u8], piece_length: usize) -> Arc<Metainfo> {
    let hashes = piece_hashes(payload, piece_length);
    let half = payload.len() / 2;
    let mut raw = Vec::new();
    raw.extend_from_slice(b"d5:filesl");
    raw.extend_from_slice(format!("d6:lengthi{}e4:pathl1:aee", half).as_bytes());
    raw.extend_from_slice(format!("d6:lengthi{}e4:pathl1:bee", half).as_bytes());
    raw.extend_from_slice(b"e4:name3:two");
    raw.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    raw.extend_from_slice(format!("6:pieces{}:", hashes.len()).as_bytes());
    raw.extend_from_slice(&hashes);
    raw.extend_from_slice(b"e");
    Arc::new(Metainfo::from_raw_info(&raw, Vec::new()).unwrap())
}

async fn spawn_seeder(meta: Arc<Metainfo>, payload: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let meta = meta.clone();
            let payload = payload.clone();
            tokio::spawn(serve_peer(stream, meta, payload));
        }
    });

    addr
}

async fn serve_peer(mut stream: TcpStream, meta: Arc<Metainfo>, payload: Vec<u8>) {
    let mut handshake = [0u8; 68];
    if stream.read_exact(&mut handshake).await.is_err() {
        return;
    }
    let theirs = Handshake::decode(&handshake).unwrap();
    assert_eq!(theirs.info_hash, meta.info_hash);

    let ours = Handshake::new(meta.info_hash, *PeerId::generate().as_bytes());
    stream.write_all(&ours.encode()).await.unwrap();

    let mut bits = Bitfield::new(meta.piece_count());
    for i in 0..meta.piece_count() {
        bits.set_piece(i);
    }
    stream
        .write_all(&Message::Bitfield(bits.to_bytes()).encode())
        .await
        .unwrap();
    stream.write_all(&Message::Unchoke.encode()).await.unwrap();

    let mut prefix = [0u8; 4];
    loop {
        if stream.read_exact(&mut prefix).await.is_err() {
            return;
        }
        let length = u32::from_be_bytes(prefix) as usize;
        let mut frame = Vec::with_capacity(4 + length);
        frame.extend_from_slice(&prefix);
        frame.resize(4 + length, 0);
        if length > 0 && stream.read_exact(&mut frame[4..]).await.is_err() {
            return;
        }

        let Ok(message) = Message::decode(Bytes::from(frame)) else {
            return;
        };
        if let Message::Request {
            index,
            begin,
            length,
        } = message
        {
            let start = index as usize * meta.piece_length as usize + begin as usize;
            let data = Bytes::copy_from_slice(&payload[start..start + length as usize]);
            let reply = Message::Piece { index, begin, data };
            if stream.write_all(&reply.encode()).await.is_err() {
                return;
            }
        }
    }
}

fn config_for(dir: &tempfile::TempDir) -> Config {
    Config {
        folder: dir.path().to_path_buf(),
        resume: false,
        max_peers: 4,
        max_requests: 8,
        port: 6881,
    }
}

#[tokio::test]
async fn test_single_file_download() {
    // Three pieces: 32 KiB, 32 KiB, 10 KiB.
    let payload: Vec<u8> = (0..75776u32).map(|i| (i % 249) as u8).collect();
    let meta = single_file_meta("single.bin", &payload, 32768);
    let dir = tempfile::tempdir().unwrap();

    let addr = spawn_seeder(meta.clone(), payload.clone()).await;

    tokio::time::timeout(
        Duration::from_secs(30),
        download_with_peers(meta, config_for(&dir), vec![addr]),
    )
    .await
    .expect("download timed out")
    .expect("download failed");

    let on_disk = std::fs::read(dir.path().join("single.bin")).unwrap();
    assert_eq!(on_disk, payload);
}

#[tokio::test]
async fn test_multi_file_piece_boundary() {
    // Two 20 KiB files, 32 KiB pieces: piece 0 spans the boundary.
    let payload: Vec<u8> = (0..40960u32).map(|i| (i % 253) as u8).collect();
    let meta = two_file_meta(&payload, 32768);
    let dir = tempfile::tempdir().unwrap();

    let addr = spawn_seeder(meta.clone(), payload.clone()).await;

    tokio::time::timeout(
        Duration::from_secs(30),
        download_with_peers(meta, config_for(&dir), vec![addr]),
    )
    .await
    .expect("download timed out")
    .expect("download failed");

    let a = std::fs::read(dir.path().join("two/a")).unwrap();
    let b = std::fs::read(dir.path().join("two/b")).unwrap();
    assert_eq!(a, &payload[..20480]);
    assert_eq!(b, &payload[20480..]);
}

#[tokio::test]
async fn test_resume_skips_verified_pieces() {
    let payload: Vec<u8> = (0..65536u32).map(|i| (i % 247) as u8).collect();
    let meta = single_file_meta("resumed.bin", &payload, 32768);
    let dir = tempfile::tempdir().unwrap();

    // Piece 0 is already on disk, recorded in the sidecar.
    std::fs::write(dir.path().join("resumed.bin"), &payload[..32768]).unwrap();
    let mut resume = ResumeData::new(meta.info_hash, meta.piece_count());
    resume.set_piece(0);
    resume
        .save(&sidecar_path(dir.path(), "resumed.bin"))
        .await
        .unwrap();

    let addr = spawn_seeder(meta.clone(), payload.clone()).await;

    let mut config = config_for(&dir);
    config.resume = true;

    tokio::time::timeout(
        Duration::from_secs(30),
        download_with_peers(meta, config, vec![addr]),
    )
    .await
    .expect("download timed out")
    .expect("download failed");

    let on_disk = std::fs::read(dir.path().join("resumed.bin")).unwrap();
    assert_eq!(on_disk, payload);
}
