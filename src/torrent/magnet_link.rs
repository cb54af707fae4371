//! BitTorrent magnet link parsing.
//!
//! Magnet links allow sharing a torrent without the .torrent file: they carry
//! the info-hash and, optionally, a display name and tracker URLs. The
//! metadata itself is fetched from a peer afterwards (see
//! [`super::extension`]).
//!
//! Format: `magnet:?xt=urn:btih:<40-hex-info-hash>&dn=<name>&tr=<tracker-url>`

use anyhow::{bail, Context, Result};

/// Represents a parsed BitTorrent magnet link.
pub struct MagnetLink {
    /// 20-byte SHA-1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Optional display name of the torrent content
    pub name: Option<String>,
    /// Optional tracker URL for peer discovery; when the link carries
    /// several `tr` parameters the first one is kept.
    pub tracker: Option<String>,
}

impl MagnetLink {
    /// Parse a magnet URI string.
    pub fn parse(magnet_link: &str) -> Result<Self> {
        let query = magnet_link
            .strip_prefix("magnet:?")
            .context("not a magnet link")?;

        let mut info_hash = None;
        let mut name = None;
        let mut tracker = None;

        for param in query.split('&') {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            match key {
                "xt" => {
                    let hash_hex = value
                        .strip_prefix("urn:btih:")
                        .context("xt parameter is not a btih urn")?;
                    if hash_hex.len() != 40 {
                        bail!("info hash must be 40 hex characters, got {}", hash_hex.len());
                    }
                    let mut hash = [0u8; 20];
                    hex::decode_to_slice(hash_hex, &mut hash)
                        .context("info hash is not valid hex")?;
                    info_hash = Some(hash);
                }
                "dn" => name = Some(percent_decode(value)?),
                "tr" => {
                    if tracker.is_none() {
                        tracker = Some(percent_decode(value)?);
                    }
                }
                _ => {}
            }
        }

        let info_hash = info_hash.context("magnet link is missing the info hash")?;

        Ok(Self {
            info_hash,
            name,
            tracker,
        })
    }
}

impl std::fmt::Display for MagnetLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(tracker) = &self.tracker {
            writeln!(f, "Tracker URL: {}", tracker)?;
        }
        write!(f, "Info Hash: {}", hex::encode(self.info_hash))
    }
}

/// Decode a percent-encoded URI component.
fn percent_decode(input: &str) -> Result<String> {
    let mut output = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();

    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next().context("invalid percent encoding")?;
            let lo = bytes.next().context("invalid percent encoding")?;
            let mut decoded = [0u8];
            hex::decode_to_slice([hi, lo], &mut decoded)
                .context("invalid percent encoding")?;
            output.push(decoded[0]);
        } else {
            output.push(b);
        }
    }

    String::from_utf8(output).context("percent-decoded value is not UTF-8")
}
