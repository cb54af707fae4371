//! Peer connection management: TCP connect, the 68-byte base handshake, and
//! the length-prefixed message framing that every later exchange uses.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;

use super::error::TorrentError;
use super::message::Message;
use crate::{PEER_ID, PROTOCOL};

pub type PeerId = [u8; 20];

/// Frames larger than this are treated as hostile; the biggest legitimate
/// message is a 16 KiB block plus its piece header.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Reserved-bits byte 5, bit 0x10: extension protocol support.
const EXTENSION_BIT: u8 = 0x10;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub info_hash: [u8; 20],
    pub peer_id: PeerId,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            info_hash: [0u8; 20],
            peer_id: *PEER_ID,
        }
    }
}

/// Where a connection is in the protocol progression. Each worker owns its
/// peer exclusively, so the state never needs synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Handshaken,
    BitfieldSeen,
    Unchoked,
}

#[derive(Debug)]
pub struct Peer {
    addr: SocketAddr,
    config: PeerConfig,
    stream: Option<TcpStream>,
    pub state: PeerState,
    pub peer_id: Option<[u8; 20]>,
    pub supports_extension: bool,
    pub ut_metadata_id: Option<u8>,
}

impl Peer {
    pub fn new(addr: SocketAddr, config: PeerConfig) -> Self {
        Self {
            addr,
            config,
            stream: None,
            state: PeerState::Disconnected,
            peer_id: None,
            supports_extension: false,
            ut_metadata_id: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Opens the TCP connection and performs the base handshake.
    pub async fn connect(&mut self) -> Result<()> {
        info!("connecting to peer: {}", self.addr);
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(TorrentError::PeerUnreachable)?;
        self.stream = Some(stream);
        self.handshake().await?;
        self.state = PeerState::Handshaken;
        Ok(())
    }

    /// Exchanges the fixed 68-byte handshake:
    /// `0x13 "BitTorrent protocol" <8 reserved> <info_hash> <peer_id>`
    async fn handshake(&mut self) -> Result<()> {
        let info_hash = self.config.info_hash;
        let peer_id = self.config.peer_id;
        let stream = self.stream_mut()?;

        let mut message = Vec::with_capacity(68);
        message.push(PROTOCOL.len() as u8);
        message.extend_from_slice(PROTOCOL.as_bytes());
        let mut reserved = [0u8; 8];
        reserved[5] = EXTENSION_BIT;
        message.extend_from_slice(&reserved);
        message.extend_from_slice(&info_hash);
        message.extend_from_slice(&peer_id);

        stream
            .write_all(&message)
            .await
            .map_err(TorrentError::PeerUnreachable)?;

        let mut response = [0u8; 68];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| TorrentError::HandshakeFailed(format!("short handshake read: {e}")))?;

        if response[0] != PROTOCOL.len() as u8 || response[1..20] != *PROTOCOL.as_bytes() {
            return Err(
                TorrentError::HandshakeFailed("unexpected protocol string".into()).into(),
            );
        }
        if response[28..48] != info_hash {
            return Err(TorrentError::HandshakeFailed("info hash mismatch".into()).into());
        }

        self.supports_extension = response[25] & EXTENSION_BIT != 0;
        let mut remote_id = [0u8; 20];
        remote_id.copy_from_slice(&response[48..68]);
        self.peer_id = Some(remote_id);
        info!("handshake complete with {}", self.addr);
        Ok(())
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        let stream = self.stream_mut()?;
        stream
            .write_all(&message.to_bytes())
            .await
            .map_err(TorrentError::PeerUnreachable)?;
        Ok(())
    }

    /// Reads one framed message. Keep-alives (length 0) are returned as
    /// [`Message::KeepAlive`]; use [`Peer::receive_data_message`] to skip them.
    pub async fn receive_message(&mut self) -> Result<Message> {
        let stream = self.stream_mut()?;

        let mut len_bytes = [0u8; 4];
        stream
            .read_exact(&mut len_bytes)
            .await
            .map_err(TorrentError::PeerUnreachable)?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len == 0 {
            return Ok(Message::KeepAlive);
        }
        if len > MAX_FRAME_LEN {
            return Err(
                TorrentError::ProtocolViolation(format!("oversized frame of {len} bytes")).into(),
            );
        }

        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(TorrentError::PeerUnreachable)?;
        Message::from_bytes(&body)
    }

    /// Reads the next non-keep-alive message.
    pub async fn receive_data_message(&mut self) -> Result<Message> {
        loop {
            match self.receive_message().await? {
                Message::KeepAlive => continue,
                message => return Ok(message),
            }
        }
    }

    /// Waits for the peer's bitfield and discards its contents; the client
    /// assumes every peer has every piece.
    pub async fn await_bitfield(&mut self) -> Result<()> {
        match self.receive_data_message().await? {
            Message::Bitfield(_) => {
                self.state = PeerState::BitfieldSeen;
                Ok(())
            }
            other => Err(TorrentError::ProtocolViolation(format!(
                "expected bitfield, got {other:?}"
            ))
            .into()),
        }
    }

    /// Sends `interested` and waits for `unchoke`.
    pub async fn express_interest(&mut self) -> Result<()> {
        self.send_message(&Message::Interested).await?;
        match self.receive_data_message().await? {
            Message::Unchoke => {
                self.state = PeerState::Unchoked;
                Ok(())
            }
            other => Err(TorrentError::ProtocolViolation(format!(
                "expected unchoke, got {other:?}"
            ))
            .into()),
        }
    }

    /// Drives the connection to the point where block requests may be sent.
    /// A freshly created peer goes through connect, bitfield and unchoke; a
    /// peer that already served a piece skips straight through.
    pub async fn prepare_for_requests(&mut self) -> Result<()> {
        if self.state == PeerState::Disconnected {
            self.connect().await?;
        }
        if self.state == PeerState::Handshaken {
            self.await_bitfield().await?;
        }
        if self.state == PeerState::BitfieldSeen {
            self.express_interest().await?;
        }
        Ok(())
    }

    /// Drops the connection; the next use must handshake again.
    pub fn close(&mut self) {
        self.stream = None;
        self.state = PeerState::Disconnected;
        self.ut_metadata_id = None;
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("not connected"))
    }
}
