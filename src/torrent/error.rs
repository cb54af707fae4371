use thiserror::Error;

/// Failure kinds raised while talking to trackers and peers.
///
/// Per-piece failures are recoverable: the scheduler requeues the piece and
/// retires the offending peer connection. Anything fatal (bad metainfo, no
/// peers, unopenable output) is reported through `anyhow` at the top level.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("tracker rejected announce: {0}")]
    TrackerRejected(String),

    #[error("peer unreachable")]
    PeerUnreachable(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("piece {index} failed hash verification")]
    HashMismatch { index: usize },

    #[error("fetched metadata does not match the magnet info hash")]
    MetadataCorrupt,

    #[error("i/o failure")]
    Io(#[source] std::io::Error),
}
