use sha1::{Digest, Sha1};
use thiserror::Error;

pub use bvalue::BValue;
pub use decoder::Decoder;

mod bvalue;
mod decoder;
mod encoder;

/// Parse faults surfaced by the decoder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// Syntactically invalid input.
    #[error("malformed bencode: {0}")]
    Malformed(String),
    /// Input ended in the middle of a value.
    #[error("unexpected end of input")]
    Truncated,
    /// A string length prefix points past the end of the input.
    #[error("string length exceeds remaining input")]
    OutOfRange,
}

/// Bencode codec entry points.
#[derive(Debug, Clone, Copy)]
pub struct Bencode;

impl Bencode {
    /// Decode bencoded bytes into a value tree.
    pub fn decode(input: &[u8]) -> Result<BValue, BencodeError> {
        Decoder::new(input).parse()
    }

    /// Encode a value tree into bencoded bytes.
    pub fn encode(value: &BValue) -> Vec<u8> {
        encoder::Encoder::new().encode(value)
    }

    /// SHA-1 of the exact byte slice that encoded the `info` dictionary.
    ///
    /// The hash is taken over the original input bytes, as recorded by the
    /// decoder, so key order and any non-canonical quirks of the source file
    /// are reflected faithfully.
    pub fn extract_info_hash(metainfo: &[u8]) -> Result<[u8; 20], BencodeError> {
        let mut decoder = Decoder::new(metainfo);
        decoder.parse()?;
        let span = decoder
            .info_span()
            .ok_or_else(|| BencodeError::Malformed("no info dictionary found".into()))?;
        let mut hasher = Sha1::new();
        hasher.update(&metainfo[span]);
        Ok(hasher.finalize().into())
    }

    /// Splits the `pieces` byte string into its 20-byte SHA-1 digests.
    pub fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>, BencodeError> {
        if pieces.len() % 20 != 0 {
            return Err(BencodeError::Malformed(format!(
                "pieces length {} is not a multiple of 20",
                pieces.len()
            )));
        }
        Ok(pieces
            .chunks_exact(20)
            .map(|chunk| chunk.try_into().unwrap())
            .collect())
    }
}
