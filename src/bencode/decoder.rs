//! Bencode decoder implementation following the BitTorrent protocol specification.
//!
//! This module provides functionality to parse bencoded data as defined in the
//! [BitTorrent protocol specification](http://www.bittorrent.org/beps/bep_0003.html#bencoding).
//!
//! Bencode supports four data types:
//! - Byte strings: `<length>:<contents>` (e.g. `4:spam`)
//! - Integers: `i<number>e` (e.g. `i42e`)
//! - Lists: `l<bencoded values>e` (e.g. `l4:spami42ee`)
//! - Dictionaries: `d<bencoded string><bencoded value>e` (e.g. `d3:bar4:spam3:fooi42ee`)
//!
//! The decoder operates on raw bytes, never on text: torrent files embed
//! arbitrary binary in their byte strings (the `pieces` digests in
//! particular), so nothing here assumes UTF-8.

use std::ops::Range;

use super::bvalue::BValue;
use super::BencodeError;

/// A streaming decoder for bencoded data.
///
/// The decoder maintains its position in the input and parses values
/// incrementally. While walking a top-level dictionary it records the byte
/// range of the `info` value, which is what the info-hash is computed over:
/// hashing the original slice sidesteps any re-encoding round-trip concerns.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
    depth: usize,
    info_span: Option<Range<usize>>,
}

impl<'a> Decoder<'a> {
    /// Creates a new decoder for the given input bytes.
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            position: 0,
            depth: 0,
            info_span: None,
        }
    }

    /// Parses a single bencoded value from the current position.
    ///
    /// Trailing bytes are left unconsumed; callers that need them (the
    /// metadata-extension payload places raw bytes after a dictionary) can
    /// check [`Decoder::position`] afterwards.
    pub fn parse(&mut self) -> Result<BValue, BencodeError> {
        self.parse_value()
    }

    /// Byte offset just past the last value parsed.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Byte range of the top-level `info` dictionary value, if one was seen.
    pub fn info_span(&self) -> Option<Range<usize>> {
        self.info_span.clone()
    }

    /// Returns the next byte in the input without consuming it.
    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    /// Consumes and returns the next byte in the input.
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.position += 1;
        Some(b)
    }

    /// Consumes bytes until the given delimiter is found.
    /// Returns the consumed slice, excluding the delimiter.
    fn take_until(&mut self, delimiter: u8) -> Result<&'a [u8], BencodeError> {
        let start = self.position;
        while let Some(b) = self.peek() {
            if b == delimiter {
                let result = &self.input[start..self.position];
                self.bump(); // consume the delimiter
                return Ok(result);
            }
            self.bump();
        }
        Err(BencodeError::Truncated)
    }

    /// Parses a bencoded value based on its prefix:
    /// - 'i' for integers
    /// - 'l' for lists
    /// - 'd' for dictionaries
    /// - digit for byte strings
    fn parse_value(&mut self) -> Result<BValue, BencodeError> {
        match self.peek() {
            Some(b'i') => Ok(BValue::Integer(self.parse_integer()?)),
            Some(b'l') => self.parse_list(),
            Some(b'd') => self.parse_dict(),
            Some(b) if b.is_ascii_digit() => Ok(BValue::Bytes(self.parse_bytes()?.to_vec())),
            Some(b) => Err(BencodeError::Malformed(format!(
                "unhandled value prefix {:#04x} at position {}",
                b, self.position
            ))),
            None => Err(BencodeError::Truncated),
        }
    }

    /// Parses a bencoded integer of the form `i<number>e`.
    ///
    /// Leading zeros and `-0` are rejected per the specification.
    fn parse_integer(&mut self) -> Result<i64, BencodeError> {
        self.bump(); // consume 'i'
        let digits = self.take_until(b'e')?;

        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(BencodeError::Malformed("invalid integer literal".into()));
        }
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(BencodeError::Malformed("integer has leading zero".into()));
        }
        if digits == b"-0" {
            return Err(BencodeError::Malformed("negative zero".into()));
        }

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| BencodeError::Malformed("integer out of range".into()))
    }

    /// Parses a bencoded byte string of the form `<length>:<contents>`.
    fn parse_bytes(&mut self) -> Result<&'a [u8], BencodeError> {
        let len_digits = self.take_until(b':')?;
        if len_digits.is_empty() || !len_digits.iter().all(u8::is_ascii_digit) {
            return Err(BencodeError::Malformed("invalid string length".into()));
        }
        let len = std::str::from_utf8(len_digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| BencodeError::Malformed("string length out of range".into()))?;

        if self.position + len > self.input.len() {
            return Err(BencodeError::OutOfRange);
        }
        let bytes = &self.input[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Parses a bencoded list of the form `l<bencoded values>e`.
    fn parse_list(&mut self) -> Result<BValue, BencodeError> {
        self.bump(); // consume 'l'
        self.depth += 1;
        let mut values = Vec::new();

        loop {
            match self.peek() {
                Some(b'e') => {
                    self.bump();
                    self.depth -= 1;
                    return Ok(BValue::List(values));
                }
                Some(_) => values.push(self.parse_value()?),
                None => return Err(BencodeError::Truncated),
            }
        }
    }

    /// Parses a bencoded dictionary of the form `d<bencoded string><bencoded value>e`.
    ///
    /// Keys must be byte strings. Canonical bencode sorts keys, but entries
    /// are stored in the order read: torrent files in the wild are not always
    /// canonical, and preserving order keeps `decode` then `encode` bit-exact.
    fn parse_dict(&mut self) -> Result<BValue, BencodeError> {
        self.bump(); // consume 'd'
        self.depth += 1;
        let mut entries: Vec<(Vec<u8>, BValue)> = Vec::new();

        loop {
            match self.peek() {
                Some(b'e') => {
                    self.bump();
                    self.depth -= 1;
                    return Ok(BValue::Dict(entries));
                }
                Some(b) if b.is_ascii_digit() => {
                    let key = self.parse_bytes()?.to_vec();
                    let value_start = self.position;
                    let value = self.parse_value()?;
                    if self.depth == 1 && key == b"info" && self.info_span.is_none() {
                        self.info_span = Some(value_start..self.position);
                    }
                    entries.push((key, value));
                }
                Some(_) => {
                    return Err(BencodeError::Malformed(
                        "dictionary key must be a byte string".into(),
                    ))
                }
                None => return Err(BencodeError::Truncated),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(input: &[u8]) -> Result<BValue, BencodeError> {
        Decoder::new(input).parse()
    }

    fn decode_json(input: &str) -> serde_json::Value {
        decode(input.as_bytes()).unwrap().to_json()
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(decode_json("i42e"), json!(42));
        assert_eq!(decode_json("i-42e"), json!(-42));
        assert_eq!(decode_json("i0e"), json!(0));
        assert_eq!(decode_json("i52e"), json!(52));
    }

    #[test]
    fn test_reject_non_canonical_integers() {
        assert!(matches!(
            decode(b"i-0e"),
            Err(BencodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(b"i03e"),
            Err(BencodeError::Malformed(_))
        ));
        assert!(matches!(decode(b"ie"), Err(BencodeError::Malformed(_))));
        assert!(matches!(decode(b"i4x2e"), Err(BencodeError::Malformed(_))));
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(decode_json("4:spam"), json!("spam"));
        assert_eq!(decode_json("0:"), json!(""));
        assert_eq!(decode_json("5:hello"), json!("hello"));
        assert_eq!(decode_json("13:Hello, World!"), json!("Hello, World!"));
    }

    #[test]
    fn test_binary_string_stays_raw() {
        let value = decode(b"4:\x00\x01\xfe\xff").unwrap();
        assert_eq!(value.as_bytes().unwrap(), &[0x00, 0x01, 0xfe, 0xff]);
        // non-printable bytes render as hex in the JSON view
        assert_eq!(value.to_json(), json!("0001feff"));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(decode_json("l4:spami42ee"), json!(["spam", 42]));
        assert_eq!(decode_json("le"), json!([]));
        assert_eq!(decode_json("li1ei2ei3ee"), json!([1, 2, 3]));
        assert_eq!(decode_json("l5:helloi52ee"), json!(["hello", 52]));
    }

    #[test]
    fn test_parse_dict() {
        assert_eq!(
            decode_json("d3:bar4:spam3:fooi42ee"),
            json!({"bar": "spam", "foo": 42})
        );
        assert_eq!(
            decode_json("d3:foo3:bar5:helloi52ee"),
            json!({"foo": "bar", "hello": 52})
        );
        assert_eq!(decode_json("de"), json!({}));
    }

    #[test]
    fn test_parse_nested() {
        assert_eq!(
            decode_json("d4:dictd1:x1:y1:zi42ee4:listl1:a1:b1:cee"),
            json!({
                "list": ["a", "b", "c"],
                "dict": {
                    "x": "y",
                    "z": 42
                }
            })
        );
    }

    #[test]
    fn test_dict_preserves_key_order() {
        // non-canonical key order must survive a decode
        let value = decode(b"d3:zzz1:a3:aaa1:be").unwrap();
        match value {
            BValue::Dict(entries) => {
                assert_eq!(entries[0].0, b"zzz");
                assert_eq!(entries[1].0, b"aaa");
            }
            _ => panic!("expected dict"),
        }
    }

    #[test]
    fn test_truncated_inputs() {
        let cases: [&[u8]; 6] = [b"i12", b"i42", b"4spam", b"l1:a", b"d1:a", b"d1:ai1e1:b"];
        for input in cases {
            assert_eq!(decode(input).unwrap_err(), BencodeError::Truncated, "input {input:?}");
        }
    }

    #[test]
    fn test_string_length_past_end() {
        assert_eq!(decode(b"10:abc").unwrap_err(), BencodeError::OutOfRange);
    }

    #[test]
    fn test_non_string_dict_key() {
        assert!(matches!(
            decode(b"di1ei2ee"),
            Err(BencodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_info_span_is_recorded() {
        let input = b"d8:announce3:url4:infod4:name4:teste3:fooi1ee";
        let mut decoder = Decoder::new(input);
        decoder.parse().unwrap();
        let span = decoder.info_span().unwrap();
        assert_eq!(&input[span], b"d4:name4:teste");
    }

    #[test]
    fn test_nested_info_key_is_ignored() {
        // only an `info` entry of the top-level dictionary counts
        let input = b"d5:outerd4:infoi1eee";
        let mut decoder = Decoder::new(input);
        decoder.parse().unwrap();
        assert!(decoder.info_span().is_none());
    }
}
