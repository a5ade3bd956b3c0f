//! Bounded queue of fresh peer endpoints.
//!
//! Tracker cycles produce endpoints; the supervisor consumes them. Each
//! `(ip, port)` pair is delivered at most once per download, so a peer that
//! keeps getting re-announced is not dialed again after it failed. The
//! channel is bounded: when the supervisor falls behind, producers wait
//! instead of dropping peers.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Creates a peer queue with the given capacity.
pub fn peer_queue(capacity: usize) -> (PeerSink, PeerSource) {
    let (tx, rx) = mpsc::channel(capacity);
    let seen = Arc::new(Mutex::new(HashSet::new()));
    (PeerSink { seen, tx }, PeerSource { rx })
}

/// Producer half, cloned into each tracker cycle.
#[derive(Clone)]
pub struct PeerSink {
    seen: Arc<Mutex<HashSet<SocketAddr>>>,
    tx: mpsc::Sender<SocketAddr>,
}

impl PeerSink {
    /// Enqueues an endpoint, waiting while the queue is full.
    ///
    /// Endpoints already seen during this download are dropped.
    pub async fn put(&self, addr: SocketAddr) {
        if !self.seen.lock().insert(addr) {
            return;
        }
        // The receiver closing just means the download is shutting down.
        let _ = self.tx.send(addr).await;
    }
}

/// Consumer half, held by the supervisor.
pub struct PeerSource {
    rx: mpsc::Receiver<SocketAddr>,
}

impl PeerSource {
    /// Returns the next fresh endpoint, or `None` if every producer is gone.
    pub async fn get(&mut self) -> Option<SocketAddr> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deduplicates_endpoints() {
        let (sink, mut source) = peer_queue(8);
        let addr: SocketAddr = "1.2.3.4:6881".parse().unwrap();
        let other: SocketAddr = "5.6.7.8:6881".parse().unwrap();

        sink.put(addr).await;
        sink.put(addr).await;
        sink.put(other).await;
        drop(sink);

        assert_eq!(source.get().await, Some(addr));
        assert_eq!(source.get().await, Some(other));
        assert_eq!(source.get().await, None);
    }

    #[tokio::test]
    async fn test_distinct_ports_are_distinct_endpoints() {
        let (sink, mut source) = peer_queue(8);
        sink.put("1.2.3.4:6881".parse().unwrap()).await;
        sink.put("1.2.3.4:6882".parse().unwrap()).await;
        drop(sink);

        assert!(source.get().await.is_some());
        assert!(source.get().await.is_some());
        assert_eq!(source.get().await, None);
    }
}
