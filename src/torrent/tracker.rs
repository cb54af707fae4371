//! Tracker communication and peer discovery functionality.
//!
//! Handles the single announce GET a download needs: build the query string,
//! fetch the bencoded response, and decode the compact peer list.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use super::error::TorrentError;
use super::peer::PeerId;
use crate::bencode::Bencode;
use crate::{utils, PEER_ID};

/// `left` value announced while bootstrapping a magnet download, before the
/// metadata (and thus the real length) is known. Must be nonzero or some
/// trackers treat the client as a seeder.
const MAGNET_LEFT_PLACEHOLDER: u64 = 999;

/// Configuration options for tracker requests.
#[derive(Debug)]
pub struct TrackerConfig {
    /// The peer ID to identify ourselves to the tracker
    pub peer_id: PeerId,
    /// The port we're listening on for incoming connections
    pub port: u16,
    /// Whether to request compact peer lists
    pub compact: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            peer_id: *PEER_ID,
            port: 6881,
            compact: true,
        }
    }
}

/// Scalar request parameters; `info_hash` is appended separately because its
/// raw bytes must be percent-encoded byte-by-byte, which the urlencoded
/// serializer would mangle.
#[derive(Debug, Serialize)]
struct AnnounceQuery {
    peer_id: String,
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    compact: u8,
}

/// URL encodes a byte slice for use in tracker requests.
fn urlencode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| format!("%{:02x}", b)).collect()
}

/// Contacts a tracker to get the list of peers for a torrent.
///
/// `left` is the number of bytes still needed; pass `None` while
/// bootstrapping from a magnet link.
pub async fn get_peers(
    announce_url: &str,
    info_hash: [u8; 20],
    left: Option<u64>,
    config: TrackerConfig,
) -> Result<Vec<SocketAddrV4>> {
    let query = AnnounceQuery {
        peer_id: utils::peer_id_display(&config.peer_id),
        port: config.port,
        uploaded: 0,
        downloaded: 0,
        left: left.unwrap_or(MAGNET_LEFT_PLACEHOLDER),
        compact: config.compact as u8,
    };

    let url = format!(
        "{}?{}&info_hash={}",
        announce_url,
        serde_urlencoded::to_string(&query).context("failed to encode announce query")?,
        urlencode(&info_hash)
    );
    info!("announcing to tracker: {}", url);

    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .context("tracker request failed")?;
    let body: bytes::Bytes = response
        .bytes()
        .await
        .context("failed to read tracker response")?;

    let peers = parse_announce_response(&body)?;
    info!("tracker returned {} peers", peers.len());
    Ok(peers)
}

/// Decodes a bencoded announce response into peer endpoints.
///
/// `peers` is a byte string of 6-byte tuples: 4 bytes big-endian IPv4
/// followed by 2 bytes big-endian port.
pub fn parse_announce_response(body: &[u8]) -> Result<Vec<SocketAddrV4>> {
    let response = Bencode::decode(body).context("tracker response is not valid bencode")?;

    if let Some(reason) = response.get(b"failure reason") {
        let reason = reason
            .as_str()
            .unwrap_or("unreadable failure reason")
            .to_owned();
        return Err(TorrentError::TrackerRejected(reason).into());
    }

    let peers_bytes = response
        .get(b"peers")
        .and_then(|v| v.as_bytes())
        .context("tracker response has no compact peers field")?;
    if peers_bytes.len() % 6 != 0 {
        return Err(TorrentError::ProtocolViolation(format!(
            "compact peer list length {} is not a multiple of 6",
            peers_bytes.len()
        ))
        .into());
    }

    Ok(peers_bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_peers() {
        let body = b"d8:intervali1800e5:peers12:\x7f\x00\x00\x01\x1a\xe1\xc0\xa8\x01\x02\x1a\xe2e";
        let peers = parse_announce_response(body).unwrap();
        assert_eq!(
            peers,
            vec![
                "127.0.0.1:6881".parse().unwrap(),
                "192.168.1.2:6882".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_failure_reason_is_rejected() {
        let body = b"d14:failure reason11:not allowede";
        let err = parse_announce_response(body).unwrap_err();
        match err.downcast_ref::<TorrentError>() {
            Some(TorrentError::TrackerRejected(reason)) => assert_eq!(reason, "not allowed"),
            other => panic!("expected TrackerRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_ragged_peer_list_is_rejected() {
        let body = b"d5:peers5:\x7f\x00\x00\x01\x1ae";
        assert!(parse_announce_response(body).is_err());
    }

    #[test]
    fn test_urlencode_is_bytewise() {
        assert_eq!(urlencode(&[0xd6, 0x9f, 0x00]), "%d6%9f%00");
    }
}
