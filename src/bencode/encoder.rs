//! Bencode encoder implementation following the BitTorrent protocol specification.
//!
//! The encoding rules are:
//! - Strings are length-prefixed base10 followed by a colon and the raw bytes
//! - Integers are 'i' followed by the number in base10 followed by 'e'
//! - Lists are 'l' followed by their elements followed by 'e'
//! - Dictionaries are 'd' followed by alternating keys and values followed by 'e'
//!
//! Dictionary entries are emitted in the order they are stored. For values
//! produced by the decoder that is the order they were read in, which keeps
//! `decode` then `encode` an identity on the input bytes and makes the
//! encoder safe to use for info-hash material.

use crate::bencode::bvalue::BValue;

/// An encoder for converting a [`BValue`] tree into Bencode bytes.
pub struct Encoder {
    output: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with an empty output buffer.
    pub fn new() -> Self {
        Self { output: Vec::new() }
    }

    /// Encodes a value tree and returns the bencoded bytes.
    pub fn encode(mut self, value: &BValue) -> Vec<u8> {
        self.push_value(value);
        self.output
    }

    fn push_value(&mut self, value: &BValue) {
        match value {
            BValue::Integer(n) => self.push_integer(*n),
            BValue::Bytes(s) => self.push_bytes(s),
            BValue::List(list) => self.push_list(list),
            BValue::Dict(entries) => self.push_dict(entries),
        }
    }

    /// Encodes an integer in the format: i<number>e
    fn push_integer(&mut self, n: i64) {
        self.output.push(b'i');
        self.output.extend_from_slice(n.to_string().as_bytes());
        self.output.push(b'e');
    }

    /// Encodes a byte string in the format: <length>:<bytes>
    fn push_bytes(&mut self, s: &[u8]) {
        self.output.extend_from_slice(s.len().to_string().as_bytes());
        self.output.push(b':');
        self.output.extend_from_slice(s);
    }

    /// Encodes a list in the format: l<bencoded values>e
    fn push_list(&mut self, list: &[BValue]) {
        self.output.push(b'l');
        for item in list {
            self.push_value(item);
        }
        self.output.push(b'e');
    }

    /// Encodes a dictionary in the format: d<bencoded string><bencoded value>e
    fn push_dict(&mut self, entries: &[(Vec<u8>, BValue)]) {
        self.output.push(b'd');
        for (key, value) in entries {
            self.push_bytes(key);
            self.push_value(value);
        }
        self.output.push(b'e');
    }
}
