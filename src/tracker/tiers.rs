use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::announce::{AnnounceParams, AnnounceResponse};
use super::error::TrackerError;
use super::http::HttpTracker;
use super::udp::UdpTracker;

/// Tiered tracker list handling (BEP-12).
///
/// Within a tier, trackers are tried in order and the first one that
/// responds is promoted to the front, so later announces reach it first.
/// The next tier is consulted only when a whole tier fails. UDP trackers
/// are kept alive across announces so their connection ids can be reused
/// within the 60-second window instead of reconnecting every cycle.
pub struct TrackerTiers {
    tiers: Vec<Vec<String>>,
    udp: HashMap<String, UdpTracker>,
}

impl TrackerTiers {
    pub fn new(announce_list: &[Vec<String>]) -> Self {
        Self {
            tiers: announce_list.to_vec(),
            udp: HashMap::new(),
        }
    }

    /// Returns true if there is no tracker at all to announce to.
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|tier| tier.is_empty())
    }

    /// Announces to the first tracker that responds.
    pub async fn announce(
        &mut self,
        params: &AnnounceParams,
    ) -> Result<AnnounceResponse, TrackerError> {
        for tier_index in 0..self.tiers.len() {
            for index in 0..self.tiers[tier_index].len() {
                let url = self.tiers[tier_index][index].clone();
                match self.announce_url(&url, params).await {
                    Ok(response) => {
                        self.tiers[tier_index][..=index].rotate_right(1);
                        return Ok(response);
                    }
                    Err(error) => {
                        tracing::debug!(%url, %error, "tracker announce failed");
                    }
                }
            }
        }
        Err(TrackerError::AllTiersFailed)
    }

    async fn announce_url(
        &mut self,
        url: &str,
        params: &AnnounceParams,
    ) -> Result<AnnounceResponse, TrackerError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            HttpTracker::new(url)?.announce(params).await
        } else if url.starts_with("udp://") {
            let tracker = match self.udp.entry(url.to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(UdpTracker::connect(url).await?),
            };
            let result = tracker.announce(params).await;
            // A failed tracker may have gone away entirely; reconnect from
            // scratch on the next cycle.
            if result.is_err() {
                self.udp.remove(url);
            }
            result
        } else {
            Err(TrackerError::UnsupportedScheme(url.to_string()))
        }
    }
}
