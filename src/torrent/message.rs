//! Peer wire protocol messages.
//!
//! Every message on the wire is a 4-byte big-endian length prefix followed by
//! a one-byte type and the payload. A zero length is a keep-alive with no
//! type or payload at all.

use anyhow::Result;

use super::error::TorrentError;

const CHOKE: u8 = 0;
const UNCHOKE: u8 = 1;
const INTERESTED: u8 = 2;
const NOT_INTERESTED: u8 = 3;
const HAVE: u8 = 4;
const BITFIELD: u8 = 5;
const REQUEST: u8 = 6;
const PIECE: u8 = 7;
const CANCEL: u8 = 8;
const EXTENSION: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    /// Extension-protocol message; the first payload byte is the extended
    /// message id (0 for the extension handshake).
    Extension {
        payload: Vec<u8>,
    },
}

impl Message {
    /// Serializes the message including its length prefix.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (msg_type, payload): (u8, Vec<u8>) = match self {
            Message::KeepAlive => return vec![0, 0, 0, 0],
            Message::Choke => (CHOKE, Vec::new()),
            Message::Unchoke => (UNCHOKE, Vec::new()),
            Message::Interested => (INTERESTED, Vec::new()),
            Message::NotInterested => (NOT_INTERESTED, Vec::new()),
            Message::Have(index) => (HAVE, index.to_be_bytes().to_vec()),
            Message::Bitfield(bits) => (BITFIELD, bits.clone()),
            Message::Request {
                index,
                begin,
                length,
            } => (REQUEST, encode_triple(*index, *begin, *length)),
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let mut payload = Vec::with_capacity(8 + block.len());
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
                (PIECE, payload)
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => (CANCEL, encode_triple(*index, *begin, *length)),
            Message::Extension { payload } => (EXTENSION, payload.clone()),
        };

        let mut bytes = Vec::with_capacity(4 + 1 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
        bytes.push(msg_type);
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Parses a message body (everything after the length prefix).
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let (&msg_type, payload) = body.split_first().ok_or_else(|| {
            TorrentError::ProtocolViolation("empty message body".into())
        })?;

        let message = match msg_type {
            CHOKE => Message::Choke,
            UNCHOKE => Message::Unchoke,
            INTERESTED => Message::Interested,
            NOT_INTERESTED => Message::NotInterested,
            HAVE => Message::Have(read_u32(payload, 0)?),
            BITFIELD => Message::Bitfield(payload.to_vec()),
            REQUEST => Message::Request {
                index: read_u32(payload, 0)?,
                begin: read_u32(payload, 4)?,
                length: read_u32(payload, 8)?,
            },
            PIECE => {
                if payload.len() < 8 {
                    return Err(TorrentError::ProtocolViolation(
                        "piece message shorter than its header".into(),
                    )
                    .into());
                }
                Message::Piece {
                    index: read_u32(payload, 0)?,
                    begin: read_u32(payload, 4)?,
                    block: payload[8..].to_vec(),
                }
            }
            CANCEL => Message::Cancel {
                index: read_u32(payload, 0)?,
                begin: read_u32(payload, 4)?,
                length: read_u32(payload, 8)?,
            },
            EXTENSION => {
                if payload.is_empty() {
                    return Err(TorrentError::ProtocolViolation(
                        "extension message without an extended id".into(),
                    )
                    .into());
                }
                Message::Extension {
                    payload: payload.to_vec(),
                }
            }
            other => {
                return Err(TorrentError::ProtocolViolation(format!(
                    "unknown message type {other}"
                ))
                .into())
            }
        };
        Ok(message)
    }
}

fn encode_triple(index: u32, begin: u32, length: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(&length.to_be_bytes());
    payload
}

fn read_u32(payload: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = payload
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| TorrentError::ProtocolViolation("message payload too short".into()))?;
    Ok(u32::from_be_bytes(bytes))
}
