//! Download orchestration.
//!
//! The supervisor wires the pieces together: it spawns the registry actor
//! and the writer task, runs announce cycles that feed the peer queue, and
//! keeps up to `max_peers` peer sessions alive, replacing any session that
//! exits with a fresh endpoint from the queue. It never aborts because one
//! peer failed; the download ends when the writer has persisted every
//! piece, or with an error when the writer hits fatal I/O trouble.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::metainfo::{MagnetLink, Metainfo, MetainfoError};
use crate::peer::{fetch_metadata_from_peer, run_session, PeerId, SessionConfig};
use crate::queue::{peer_queue, PeerSink};
use crate::registry::{PeerKey, RegistryHandle};
use crate::storage::{run_writer, sidecar_path, ResumeData, StorageError, TorrentFiles};
use crate::tracker::{AnnounceParams, TrackerEvent, TrackerTiers};

/// Delay before retrying after every tracker tier failed.
const TRACKER_RETRY_DELAY: Duration = Duration::from_secs(30);
/// How long the final `stopped`/`completed` announce may take.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(5);

/// Download-wide settings, mostly from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination directory.
    pub folder: PathBuf,
    /// Verify and reuse pieces recorded in the resume sidecar.
    pub resume: bool,
    /// Peer connection bound (*P*).
    pub max_peers: usize,
    /// Outstanding requests per session (*R*).
    pub max_requests: usize,
    /// Port advertised to trackers.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("."),
            resume: false,
            max_peers: 50,
            max_requests: 50,
            port: 6881,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("could not fetch metadata from any peer")]
    MetadataUnavailable,

    #[error("internal task failed: {0}")]
    TaskFailed(String),
}

/// Downloads a torrent to completion.
///
/// Returns once every piece has been verified and persisted.
pub async fn download(meta: Arc<Metainfo>, config: Config) -> Result<(), DownloadError> {
    download_with_peers(meta, config, Vec::new()).await
}

/// Like [`download`], with extra peer endpoints injected alongside whatever
/// the trackers return. With an empty announce list this downloads from the
/// given peers only.
pub async fn download_with_peers(
    meta: Arc<Metainfo>,
    config: Config,
    extra_peers: Vec<SocketAddr>,
) -> Result<(), DownloadError> {
    let peer_id = PeerId::generate();

    let seeded = if config.resume {
        verify_resume(&meta, &config.folder).await?
    } else {
        Vec::new()
    };
    if !seeded.is_empty() {
        tracing::info!(pieces = seeded.len(), "resuming with verified pieces");
    }

    let (pieces_tx, pieces_rx) = mpsc::channel(config.max_peers.max(1));
    let registry = RegistryHandle::spawn(meta.clone(), pieces_tx, &seeded);
    let mut writer = tokio::spawn(run_writer(
        meta.clone(),
        config.folder.clone(),
        seeded,
        pieces_rx,
    ));

    let (sink, mut source) = peer_queue(4 * config.max_peers.max(1));
    for addr in extra_peers {
        sink.put(addr).await;
    }

    let announce = tokio::spawn(announce_cycle(
        meta.clone(),
        registry.clone(),
        peer_id,
        config.port,
        sink,
    ));

    let session_config = SessionConfig {
        max_requests: config.max_requests,
        ..SessionConfig::default()
    };

    let mut sessions: JoinSet<(PeerKey, Result<(), crate::peer::PeerError>)> = JoinSet::new();
    let mut queue_open = true;

    let result = loop {
        tokio::select! {
            finished = &mut writer => {
                break match finished {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(DownloadError::Storage(e)),
                    Err(e) => Err(DownloadError::TaskFailed(e.to_string())),
                };
            }

            // A session ended: return its reservations and free its slot.
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                match joined {
                    Ok((key, outcome)) => {
                        registry.release(key);
                        if let Err(error) = outcome {
                            tracing::debug!(%error, "peer session ended");
                        }
                    }
                    Err(join_error) => {
                        tracing::warn!(%join_error, "peer session panicked");
                    }
                }
            }

            addr = source.get(), if queue_open && sessions.len() < config.max_peers => {
                match addr {
                    Some(addr) => {
                        let Ok((key, hints)) = registry.register().await else {
                            break Err(DownloadError::TaskFailed("registry gone".into()));
                        };
                        sessions.spawn(run_session_keyed(
                            addr,
                            meta.clone(),
                            peer_id,
                            registry.clone(),
                            key,
                            hints,
                            session_config.clone(),
                        ));
                    }
                    None => queue_open = false,
                }
            }
        }
    };

    // Shutdown: everything below is torn down with the registry, so only
    // the sessions that finish on their own still bother to release.
    announce.abort();
    sessions.abort_all();
    while let Some(joined) = sessions.join_next().await {
        if let Ok((key, _)) = joined {
            registry.release(key);
        }
    }

    // Say goodbye to the trackers; losing this race is harmless.
    let farewell = if result.is_ok() {
        TrackerEvent::Completed
    } else {
        TrackerEvent::Stopped
    };
    let _ = timeout(
        FAREWELL_TIMEOUT,
        announce_once(&meta, peer_id, config.port, farewell),
    )
    .await;

    result
}

async fn run_session_keyed(
    addr: SocketAddr,
    meta: Arc<Metainfo>,
    peer_id: PeerId,
    registry: RegistryHandle,
    key: PeerKey,
    hints: mpsc::UnboundedReceiver<crate::registry::BlockSpec>,
    config: SessionConfig,
) -> (PeerKey, Result<(), crate::peer::PeerError>) {
    tracing::debug!(%addr, "connecting to peer");
    let outcome = run_session(addr, meta, peer_id, registry, key, hints, config).await;
    (key, outcome)
}

/// Re-verifies the pieces recorded in the resume sidecar against the bytes
/// on disk; only pieces whose SHA-1 still matches are reused.
async fn verify_resume(meta: &Arc<Metainfo>, folder: &std::path::Path) -> Result<Vec<u32>, StorageError> {
    let path = sidecar_path(folder, &meta.name);
    let resume = match ResumeData::load(&path, meta.info_hash, meta.piece_count()).await {
        Ok(resume) => resume,
        Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(error) => {
            tracing::warn!(%error, "ignoring unusable resume data");
            return Ok(Vec::new());
        }
    };

    let mut files = TorrentFiles::new(folder.to_path_buf(), meta.clone());
    files.allocate().await?;

    let mut verified = Vec::new();
    for piece in resume.pieces() {
        let data = match files.read_piece(piece).await {
            Ok(data) => data,
            Err(_) => continue,
        };
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest: [u8; 20] = hasher.finalize().into();
        if digest == meta.pieces[piece as usize] {
            verified.push(piece);
        }
    }

    Ok(verified)
}

/// Periodic announce loop: asks every tier for peers, feeds them into the
/// queue, and sleeps for the interval the tracker requested. Runs until
/// aborted by the supervisor.
async fn announce_cycle(
    meta: Arc<Metainfo>,
    registry: RegistryHandle,
    peer_id: PeerId,
    port: u16,
    sink: PeerSink,
) {
    let mut tiers = TrackerTiers::new(&meta.announce_list);
    if tiers.is_empty() {
        tracing::warn!("no trackers to announce to");
        return;
    }

    let mut event = TrackerEvent::Started;
    loop {
        let left = match registry.progress().await {
            Ok((complete, _)) => meta
                .total_length
                .saturating_sub(complete as u64 * meta.piece_length),
            Err(_) => return,
        };

        let params = AnnounceParams {
            info_hash: meta.info_hash,
            peer_id: *peer_id.as_bytes(),
            port,
            uploaded: 0,
            downloaded: meta.total_length - left,
            left,
            event,
            num_want: None,
        };

        match tiers.announce(&params).await {
            Ok(response) => {
                event = TrackerEvent::None;
                tracing::debug!(peers = response.peers.len(), interval = response.interval, "announce ok");
                for peer in response.peers {
                    sink.put(peer).await;
                }
                tokio::time::sleep(Duration::from_secs(response.interval.max(1) as u64)).await;
            }
            Err(error) => {
                tracing::warn!(%error, "announce cycle failed, backing off");
                tokio::time::sleep(TRACKER_RETRY_DELAY).await;
            }
        }
    }
}

async fn announce_once(meta: &Arc<Metainfo>, peer_id: PeerId, port: u16, event: TrackerEvent) {
    let mut tiers = TrackerTiers::new(&meta.announce_list);
    if tiers.is_empty() {
        return;
    }
    let params = AnnounceParams {
        info_hash: meta.info_hash,
        peer_id: *peer_id.as_bytes(),
        port,
        uploaded: 0,
        downloaded: 0,
        left: 0,
        event,
        num_want: Some(0),
    };
    let _ = tiers.announce(&params).await;
}

/// Fetches the raw `info` dictionary for a magnet link by racing metadata
/// exchange against up to `max_peers` peers from the magnet's trackers.
pub async fn fetch_metadata(
    magnet: &MagnetLink,
    config: &Config,
) -> Result<Bytes, DownloadError> {
    let peer_id = PeerId::generate();
    let info_hash = magnet.info_hash;

    let announce_list: Vec<Vec<String>> = magnet.trackers.iter().map(|t| vec![t.clone()]).collect();
    if announce_list.is_empty() {
        return Err(DownloadError::MetadataUnavailable);
    }

    let (sink, mut source) = peer_queue(4 * config.max_peers.max(1));
    let announce = tokio::spawn(magnet_announce_cycle(
        announce_list,
        info_hash,
        peer_id,
        config.port,
        sink,
    ));

    let mut attempts: JoinSet<Result<Bytes, crate::peer::PeerError>> = JoinSet::new();
    let mut queue_open = true;

    let result = loop {
        tokio::select! {
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                match joined {
                    Ok(Ok(raw_info)) => break Ok(raw_info),
                    Ok(Err(error)) => {
                        tracing::debug!(%error, "metadata fetch attempt failed");
                    }
                    Err(_) => {}
                }
            }

            addr = source.get(), if queue_open && attempts.len() < config.max_peers => {
                match addr {
                    Some(addr) => {
                        attempts.spawn(fetch_metadata_from_peer(
                            addr,
                            info_hash,
                            *peer_id.as_bytes(),
                        ));
                    }
                    None => queue_open = false,
                }
            }

            else => break Err(DownloadError::MetadataUnavailable),
        }
    };

    announce.abort();
    attempts.abort_all();
    while attempts.join_next().await.is_some() {}

    result
}

async fn magnet_announce_cycle(
    announce_list: Vec<Vec<String>>,
    info_hash: crate::metainfo::InfoHash,
    peer_id: PeerId,
    port: u16,
    sink: PeerSink,
) {
    let mut tiers = TrackerTiers::new(&announce_list);
    let mut event = TrackerEvent::Started;
    loop {
        let params = AnnounceParams {
            info_hash,
            peer_id: *peer_id.as_bytes(),
            port,
            uploaded: 0,
            downloaded: 0,
            // The metadata size is unknown before the exchange.
            left: 0,
            event,
            num_want: None,
        };

        match tiers.announce(&params).await {
            Ok(response) => {
                event = TrackerEvent::None;
                for peer in response.peers {
                    sink.put(peer).await;
                }
                tokio::time::sleep(Duration::from_secs(response.interval.max(1) as u64)).await;
            }
            Err(error) => {
                tracing::warn!(%error, "magnet announce failed, backing off");
                tokio::time::sleep(TRACKER_RETRY_DELAY).await;
            }
        }
    }
}
