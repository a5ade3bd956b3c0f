//! UDP tracker protocol (BEP-15).
//!
//! A stop-and-wait protocol: a `connect` request yields a connection id,
//! which authorizes `announce` requests for 60 seconds. Lost datagrams are
//! retransmitted with timeout `15 * 2^n` seconds for attempt `n`, up to 8
//! attempts, after which the tracker is declared failed for this cycle.
//! Transaction ids are random, held constant across retransmissions of the
//! same request, and matched against every reply.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng as _;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Instant};

use super::announce::{parse_compact_peers, AnnounceParams, AnnounceResponse};
use super::error::TrackerError;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const MAX_ATTEMPTS: u32 = 8;
const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

/// A connection to a single UDP tracker.
pub struct UdpTracker {
    socket: UdpSocket,
    connection: Option<(u64, Instant)>,
}

impl UdpTracker {
    /// Binds a socket and resolves the tracker address from a `udp://` URL.
    pub async fn connect(url: &str) -> Result<Self, TrackerError> {
        let addr = resolve_udp_url(url).await?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(Self {
            socket,
            connection: None,
        })
    }

    /// Runs the connect/announce exchange, retransmitting on the BEP-15
    /// backoff schedule.
    pub async fn announce(
        &mut self,
        params: &AnnounceParams,
    ) -> Result<AnnounceResponse, TrackerError> {
        let connect_tid: u32 = rand::rng().random();
        let announce_tid: u32 = rand::rng().random();
        let mut buf = vec![0u8; 4096];

        for attempt in 0..MAX_ATTEMPTS {
            // Connection ids expire; get a fresh one when needed.
            let connection_id = match self.connection {
                Some((id, acquired)) if acquired.elapsed() < CONNECTION_ID_TTL => id,
                _ => {
                    self.socket.send(&connect_request(connect_tid)).await?;
                    let reply =
                        match timeout(retry_timeout(attempt), self.socket.recv(&mut buf)).await {
                            Ok(n) => &buf[..n?],
                            Err(_) => continue,
                        };
                    let id = parse_connect_response(reply, connect_tid)?;
                    self.connection = Some((id, Instant::now()));
                    id
                }
            };

            self.socket
                .send(&announce_request(announce_tid, connection_id, params))
                .await?;
            let reply = match timeout(retry_timeout(attempt), self.socket.recv(&mut buf)).await {
                Ok(n) => &buf[..n?],
                Err(_) => continue,
            };
            return parse_announce_response(reply, announce_tid);
        }

        Err(TrackerError::Timeout)
    }
}

/// Timeout before retransmitting attempt `n`: `15 * 2^n` seconds.
pub(super) fn retry_timeout(attempt: u32) -> Duration {
    Duration::from_secs(15 * (1 << attempt))
}

pub(super) fn connect_request(transaction_id: u32) -> [u8; 16] {
    let mut request = [0u8; 16];
    request[..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    request[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
    request[12..].copy_from_slice(&transaction_id.to_be_bytes());
    request
}

pub(super) fn parse_connect_response(
    data: &[u8],
    transaction_id: u32,
) -> Result<u64, TrackerError> {
    if data.len() < 16 {
        return Err(TrackerError::InvalidResponse("connect reply too short".into()));
    }
    let action = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let tid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if action != ACTION_CONNECT || tid != transaction_id {
        return Err(TrackerError::InvalidResponse(
            "connect reply mismatch".into(),
        ));
    }
    Ok(u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]))
}

pub(super) fn announce_request(
    transaction_id: u32,
    connection_id: u64,
    params: &AnnounceParams,
) -> Vec<u8> {
    let key: u32 = rand::rng().random();
    let num_want = params.num_want.map_or(-1i32, |n| n as i32);

    let mut request = Vec::with_capacity(98);
    request.extend_from_slice(&connection_id.to_be_bytes());
    request.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request.extend_from_slice(params.info_hash.as_bytes());
    request.extend_from_slice(&params.peer_id);
    request.extend_from_slice(&params.downloaded.to_be_bytes());
    request.extend_from_slice(&params.left.to_be_bytes());
    request.extend_from_slice(&params.uploaded.to_be_bytes());
    request.extend_from_slice(&params.event.as_udp_id().to_be_bytes());
    request.extend_from_slice(&0u32.to_be_bytes()); // IP address: let the tracker use the source
    request.extend_from_slice(&key.to_be_bytes());
    request.extend_from_slice(&num_want.to_be_bytes());
    request.extend_from_slice(&params.port.to_be_bytes());
    request
}

pub(super) fn parse_announce_response(
    data: &[u8],
    transaction_id: u32,
) -> Result<AnnounceResponse, TrackerError> {
    if data.len() < 8 {
        return Err(TrackerError::InvalidResponse("announce reply too short".into()));
    }

    let action = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let tid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    if action == ACTION_ERROR {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(&data[8..]).into_owned(),
        ));
    }

    if action != ACTION_ANNOUNCE || tid != transaction_id || data.len() < 20 {
        return Err(TrackerError::InvalidResponse(
            "announce reply mismatch".into(),
        ));
    }

    let interval = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let leechers = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
    let seeders = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);

    let mut response = AnnounceResponse::new(interval);
    response.complete = Some(seeders);
    response.incomplete = Some(leechers);
    response.peers = parse_compact_peers(&data[20..]);
    Ok(response)
}

async fn resolve_udp_url(url: &str) -> Result<SocketAddr, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
    let host_port = rest.split('/').next().unwrap_or(rest);

    lookup_host(host_port)
        .await
        .map_err(|_| TrackerError::InvalidUrl(url.to_string()))?
        .next()
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))
}
