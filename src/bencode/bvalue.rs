use std::fmt::Display;

/// Represents a Bencode value as defined in the BitTorrent specification.
///
/// Bencode (pronounced like B-encode) supports four different types of values:
/// - Byte strings (opaque bytes, not assumed to be UTF-8)
/// - Integers
/// - Lists
/// - Dictionaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BValue {
    /// An integer value, can be positive or negative
    /// Example: `i42e` represents 42
    Integer(i64),

    /// A byte string, prefixed with its length
    /// Example: `4:spam` represents "spam"
    Bytes(Vec<u8>),

    /// A list of BValue elements
    /// Example: `l4:spami42ee` represents ["spam", 42]
    List(Vec<BValue>),

    /// A dictionary mapping byte-string keys to BValues, kept in the order
    /// the entries were read so re-encoding reproduces the input bytes.
    /// Example: `d3:bar4:spam3:fooi42ee` represents {"bar": "spam", "foo": 42}
    Dict(Vec<(Vec<u8>, BValue)>),
}

impl BValue {
    /// Looks up a dictionary entry by raw key bytes.
    pub fn get(&self, key: &[u8]) -> Option<&BValue> {
        match self {
            BValue::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_slice() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            BValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Attempts to view a byte string as UTF-8 text. Callers use this for
    /// fields that are known to be text (`announce`, `name`), never `pieces`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self)
    }
}

impl From<&BValue> for serde_json::Value {
    fn from(value: &BValue) -> Self {
        match value {
            BValue::Integer(n) => serde_json::Value::Number((*n).into()),
            BValue::Bytes(s) => {
                if s.iter().any(|&b| !(32..=126).contains(&b)) {
                    serde_json::Value::String(hex::encode(s))
                } else {
                    serde_json::Value::String(String::from_utf8_lossy(s).into_owned())
                }
            }
            BValue::List(list) => serde_json::Value::Array(list.iter().map(|v| v.into()).collect()),
            BValue::Dict(entries) => {
                let obj = entries
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.into()))
                    .collect();
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl Display for BValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
