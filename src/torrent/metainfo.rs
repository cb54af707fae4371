//! BitTorrent metainfo file parser and utilities.
//!
//! A torrent file (also known as a metainfo file) contains metadata about files to be shared
//! in the BitTorrent protocol. This module provides functionality to parse and work with these files.
//!
//! # Structure
//!
//! The torrent file is a bencoded dictionary containing:
//!
//! - `announce`: URL of the tracker server that coordinates peers
//! - `info`: Dictionary containing core metadata about the file(s):
//!   - `name`: Suggested filename/directory name
//!   - `length`: Total size in bytes (single-file torrents), or `files` with
//!     per-file lengths and path components (multi-file torrents)
//!   - `piece length`: Number of bytes per piece
//!   - `pieces`: Concatenated SHA-1 hashes of all pieces
//!
//! Multi-file metadata is parsed and summed, but the downloader always
//! produces a single concatenated output stream.

use std::fmt::Display;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::bencode::Bencode;

/// Represents a parsed BitTorrent metainfo file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentMetainfo {
    /// URL of the tracker server. Absent until the metadata fetch for some
    /// magnet-sourced torrents.
    pub announce: Option<String>,
    /// Core metadata about the torrent content
    pub info: TorrentInfo,
    /// SHA-1 of the bencoded `info` dictionary, taken over the original
    /// file bytes at parse time.
    #[serde(skip)]
    info_hash: [u8; 20],
}

impl TorrentMetainfo {
    /// Parse a torrent file from its raw bytes.
    ///
    /// The info-hash is computed from the exact byte span the `info` value
    /// occupied in `bytes`, not from a re-encoding of the parsed tree.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut torrent: Self =
            serde_bencode::from_bytes(bytes).context("failed to parse torrent file")?;
        torrent.info_hash =
            Bencode::extract_info_hash(bytes).context("failed to hash info dictionary")?;
        Ok(torrent)
    }

    /// Assembles a metainfo record from parts, used once a magnet link's
    /// metadata has been fetched from a peer.
    pub fn new(announce: Option<String>, info: TorrentInfo, info_hash: [u8; 20]) -> Self {
        Self {
            announce,
            info,
            info_hash,
        }
    }

    /// The 20-byte SHA-1 hash identifying this torrent.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }
}

impl Display for TorrentMetainfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tracker URL: {}", self.announce.as_deref().unwrap_or(""))?;
        writeln!(f, "Length: {}", self.info.total_length())?;
        writeln!(f, "Info Hash: {}", hex::encode(self.info_hash))?;
        writeln!(f, "Piece Length: {}", self.info.piece_length)?;
        writeln!(f, "Piece Hashes:")?;
        for hash in self.info.pieces.chunks_exact(20) {
            writeln!(f, "{}", hex::encode(hash))?;
        }
        Ok(())
    }
}

/// The `info` dictionary of a metainfo file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Suggested output name (file or directory). Purely advisory.
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: usize,
    /// Concatenated 20-byte SHA-1 digests, one per piece. Raw bytes, never
    /// valid UTF-8 in practice.
    pub pieces: ByteBuf,
    #[serde(flatten)]
    pub keys: Keys,
}

/// There is a key `length` or a key `files`, but not both or neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keys {
    /// A single file of the given length.
    SingleFile { length: usize },
    /// A directory of files, downloaded as one concatenated stream.
    MultiFile { files: Vec<FileEntry> },
}

/// One file of a multi-file torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub length: usize,
    /// Path components, the last of which is the file name.
    pub path: Vec<String>,
}

impl TorrentInfo {
    /// Sum of all file lengths.
    pub fn total_length(&self) -> usize {
        match &self.keys {
            Keys::SingleFile { length } => *length,
            Keys::MultiFile { files } => files.iter().map(|file| file.length).sum(),
        }
    }

    pub fn piece_hashes(&self) -> Result<Vec<[u8; 20]>> {
        Bencode::split_piece_hashes(&self.pieces).context("invalid pieces field")
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len() / 20
    }

    /// Length of the piece at `piece_index`.
    pub fn piece_size(&self, piece_index: usize) -> usize {
        piece_size(
            piece_index,
            self.total_pieces(),
            self.piece_length,
            self.total_length(),
        )
    }
}

/// Length of the piece at `piece_index`; only the last piece may be shorter
/// than `piece_length`. Shared with the scheduler, which sizes its jobs from
/// bare parts when the metadata came over the extension protocol.
pub fn piece_size(
    piece_index: usize,
    total_pieces: usize,
    piece_length: usize,
    total_length: usize,
) -> usize {
    if piece_index == total_pieces - 1 {
        let remainder = total_length % piece_length;
        if remainder == 0 {
            piece_length
        } else {
            remainder
        }
    } else {
        piece_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn single_file_torrent() -> Vec<u8> {
        let mut bytes = b"d8:announce31:http://tracker.example/announce4:info".to_vec();
        bytes.extend_from_slice(b"d6:lengthi40000e4:name4:test12:piece lengthi16384e6:pieces60:");
        bytes.extend_from_slice(&[0xabu8; 60]);
        bytes.extend_from_slice(b"ee");
        bytes
    }

    #[test]
    fn test_parse_single_file() {
        let bytes = single_file_torrent();
        let torrent = TorrentMetainfo::from_bytes(&bytes).unwrap();

        assert_eq!(
            torrent.announce.as_deref(),
            Some("http://tracker.example/announce")
        );
        assert_eq!(torrent.info.name, "test");
        assert_eq!(torrent.info.piece_length, 16384);
        assert_eq!(torrent.info.total_length(), 40000);
        assert_eq!(torrent.info.total_pieces(), 3);
        assert_eq!(torrent.info.piece_hashes().unwrap().len(), 3);
    }

    #[test]
    fn test_info_hash_covers_raw_info_slice() {
        let bytes = single_file_torrent();
        let torrent = TorrentMetainfo::from_bytes(&bytes).unwrap();

        // the info value spans from just after "4:info" to just before the
        // final dictionary terminator
        let start = b"d8:announce31:http://tracker.example/announce4:info".len();
        let end = bytes.len() - 1;
        let mut hasher = Sha1::new();
        hasher.update(&bytes[start..end]);
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(torrent.info_hash(), expected);
    }

    #[test]
    fn test_piece_size_of_last_piece() {
        let bytes = single_file_torrent();
        let torrent = TorrentMetainfo::from_bytes(&bytes).unwrap();

        assert_eq!(torrent.info.piece_size(0), 16384);
        assert_eq!(torrent.info.piece_size(1), 16384);
        assert_eq!(torrent.info.piece_size(2), 40000 - 2 * 16384);
    }

    #[test]
    fn test_parse_multi_file() {
        let mut bytes = b"d8:announce3:url4:info".to_vec();
        bytes.extend_from_slice(
            b"d5:filesld6:lengthi100e4:pathl3:sub1:aeed6:lengthi50e4:pathl1:beee",
        );
        bytes.extend_from_slice(b"4:name3:dir12:piece lengthi16384e6:pieces20:");
        bytes.extend_from_slice(&[0x11u8; 20]);
        bytes.extend_from_slice(b"ee");

        let torrent = TorrentMetainfo::from_bytes(&bytes).unwrap();
        assert_eq!(torrent.info.total_length(), 150);
        match &torrent.info.keys {
            Keys::MultiFile { files } => {
                assert_eq!(files.len(), 2);
                assert_eq!(files[0].path, vec!["sub", "a"]);
                assert_eq!(files[1].length, 50);
            }
            Keys::SingleFile { .. } => panic!("expected multi-file torrent"),
        }
    }
}
