//! ut_metadata extension protocol (BEP 9/10): fetching the info dictionary
//! from a peer when starting from a magnet link.
//!
//! The exchange rides on message type 20. The first payload byte is the
//! extended message id: 0 for the extension handshake, then whatever id each
//! side assigned to `ut_metadata` for the metadata request and reply.

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use tracing::info;

use super::error::TorrentError;
use super::message::Message;
use super::metainfo::TorrentInfo;
use super::peer::{Peer, PeerState};
use crate::bencode::{BValue, Bencode, Decoder};

/// The extended message id this client assigns to `ut_metadata` and
/// advertises in its extension handshake.
pub const UT_METADATA_ID: u8 = 19;

/// Performs the extension handshake and records the peer's `ut_metadata` id.
///
/// Expects the base handshake to have completed; the peer's bitfield is read
/// and discarded first if it has not been seen yet.
pub async fn negotiate(peer: &mut Peer) -> Result<u8> {
    if !peer.supports_extension {
        return Err(TorrentError::HandshakeFailed(
            "peer does not advertise extension protocol support".into(),
        )
        .into());
    }
    if peer.state == PeerState::Handshaken {
        peer.await_bitfield().await?;
    }

    let handshake = BValue::Dict(vec![(
        b"m".to_vec(),
        BValue::Dict(vec![(
            b"ut_metadata".to_vec(),
            BValue::Integer(UT_METADATA_ID as i64),
        )]),
    )]);
    let mut payload = vec![0u8];
    payload.extend_from_slice(&Bencode::encode(&handshake));
    peer.send_message(&Message::Extension { payload }).await?;

    let reply = expect_extension(peer).await?;
    if reply.first() != Some(&0) {
        return Err(TorrentError::ProtocolViolation(
            "expected an extension handshake reply".into(),
        )
        .into());
    }
    let dict = Bencode::decode(&reply[1..]).context("invalid extension handshake payload")?;
    let ut_metadata_id = dict
        .get(b"m")
        .and_then(|m| m.get(b"ut_metadata"))
        .and_then(BValue::as_int)
        .context("peer did not offer ut_metadata")?;
    let ut_metadata_id =
        u8::try_from(ut_metadata_id).context("peer sent an out-of-range extension id")?;

    peer.ut_metadata_id = Some(ut_metadata_id);
    info!("peer {} uses ut_metadata id {}", peer.addr(), ut_metadata_id);
    Ok(ut_metadata_id)
}

/// Requests the full metadata piece from the peer and verifies it against
/// the magnet link's info hash.
pub async fn fetch_info(peer: &mut Peer, info_hash: [u8; 20]) -> Result<TorrentInfo> {
    let ut_metadata_id = match peer.ut_metadata_id {
        Some(id) => id,
        None => negotiate(peer).await?,
    };

    let request = BValue::Dict(vec![
        (b"msg_type".to_vec(), BValue::Integer(0)),
        (b"piece".to_vec(), BValue::Integer(0)),
    ]);
    let mut payload = vec![ut_metadata_id];
    payload.extend_from_slice(&Bencode::encode(&request));
    peer.send_message(&Message::Extension { payload }).await?;

    let reply = expect_extension(peer).await?;
    if reply.first() != Some(&UT_METADATA_ID) {
        return Err(TorrentError::ProtocolViolation(format!(
            "metadata reply addressed to extension id {:?}, expected {}",
            reply.first(),
            UT_METADATA_ID
        ))
        .into());
    }

    // The reply payload is a bencoded header dictionary immediately followed
    // by `total_size` raw bytes of the info dictionary.
    let mut decoder = Decoder::new(&reply[1..]);
    let header = decoder
        .parse()
        .context("invalid metadata reply header")?;
    let info_bytes = &reply[1 + decoder.position()..];

    if header.get(b"msg_type").and_then(BValue::as_int) != Some(1) {
        return Err(TorrentError::ProtocolViolation(
            "peer rejected the metadata request".into(),
        )
        .into());
    }
    let total_size = header
        .get(b"total_size")
        .and_then(BValue::as_int)
        .context("metadata reply is missing total_size")?;
    if info_bytes.len() != total_size as usize {
        return Err(TorrentError::ProtocolViolation(format!(
            "metadata reply carries {} bytes but declared {}",
            info_bytes.len(),
            total_size
        ))
        .into());
    }

    let mut hasher = Sha1::new();
    hasher.update(info_bytes);
    let digest: [u8; 20] = hasher.finalize().into();
    if digest != info_hash {
        return Err(TorrentError::MetadataCorrupt.into());
    }

    let torrent_info: TorrentInfo =
        serde_bencode::from_bytes(info_bytes).context("failed to parse fetched metadata")?;
    info!(
        "fetched metadata for {:?}: {} bytes in {} pieces",
        torrent_info.name,
        torrent_info.total_length(),
        torrent_info.total_pieces()
    );
    Ok(torrent_info)
}

async fn expect_extension(peer: &mut Peer) -> Result<Vec<u8>> {
    match peer.receive_data_message().await? {
        Message::Extension { payload } => Ok(payload),
        other => Err(TorrentError::ProtocolViolation(format!(
            "expected extension message, got {other:?}"
        ))
        .into()),
    }
}
