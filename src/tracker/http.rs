use std::time::Duration;

use reqwest::Client;

use super::announce::{parse_compact_peers, url_encode_bytes, AnnounceParams, AnnounceResponse};
use super::error::TrackerError;
use crate::bencode::decode;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_NUM_WANT: u32 = 50;

/// An HTTP(S) tracker client (BEP-3).
///
/// Announces are plain GET requests; the binary parameters (info hash and
/// peer id) are percent-encoded byte by byte. The response is a bencoded
/// dictionary with the re-announce interval and either a compact peer
/// string or a list of peer dictionaries.
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn announce(
        &self,
        params: &AnnounceParams,
    ) -> Result<AnnounceResponse, TrackerError> {
        // The announce URL may already carry query parameters.
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}",
            self.url,
            separator,
            params.info_hash.url_encode(),
            url_encode_bytes(&params.peer_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
            params.num_want.unwrap_or(DEFAULT_NUM_WANT),
        );

        let event = params.event.as_str();
        if !event.is_empty() {
            url.push_str("&event=");
            url.push_str(event);
        }

        let response = self.client.get(&url).send().await?;
        let bytes = response.bytes().await?;

        let value = decode(&bytes)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| TrackerError::InvalidResponse("expected dict".into()))?;

        if let Some(failure) = dict
            .get(b"failure reason".as_slice())
            .and_then(|v| v.as_str())
        {
            return Err(TrackerError::Failure(failure.to_string()));
        }

        let interval = dict
            .get(b"interval".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?
            as u32;

        let mut result = AnnounceResponse::new(interval);

        result.complete = dict
            .get(b"complete".as_slice())
            .and_then(|v| v.as_integer())
            .map(|v| v as u32);

        result.incomplete = dict
            .get(b"incomplete".as_slice())
            .and_then(|v| v.as_integer())
            .map(|v| v as u32);

        let peers = dict
            .get(b"peers".as_slice())
            .ok_or_else(|| TrackerError::InvalidResponse("missing peers".into()))?;

        if let Some(compact) = peers.as_bytes() {
            // Compact form: one 6-byte record per peer.
            result.peers = parse_compact_peers(compact);
        } else if let Some(list) = peers.as_list() {
            // Original form: a list of {ip, port} dictionaries.
            for peer in list {
                let ip = peer
                    .get(b"ip")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok());
                let port = peer
                    .get(b"port")
                    .and_then(|v| v.as_integer())
                    .and_then(|p| u16::try_from(p).ok());

                if let (Some(ip), Some(port)) = (ip, port) {
                    result.peers.push(std::net::SocketAddr::new(ip, port));
                }
            }
        } else {
            return Err(TrackerError::InvalidResponse("malformed peers".into()));
        }

        Ok(result)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
