use std::borrow::Cow;

const RECORD_TAG: u8 = b'r';
const INDEX_TAG: u8 = b'i';
const SEQUENCE_TAG: u8 = b's';
const SEP: u8 = 0x00;

/// Structured key for engine storage operations.
///
/// - `Record(type, key)`: `r\x00{type}\x00{encoded key}`
/// - `Index(type, index, value)`: `i\x00{type}\x00{index}\x00{encoded value}`
/// - `Sequence(type)`: `s\x00{type}`
///
/// Type and index names never contain `\x00`, so the trailing encoded bytes
/// are everything after the last fixed separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key<'a> {
    Record(Cow<'a, str>, Cow<'a, [u8]>),
    Index(Cow<'a, str>, Cow<'a, str>, Cow<'a, [u8]>),
    Sequence(Cow<'a, str>),
}

impl<'a> Key<'a> {
    pub fn record(type_name: &'a str, key: &'a [u8]) -> Self {
        Key::Record(Cow::Borrowed(type_name), Cow::Borrowed(key))
    }

    pub fn index(type_name: &'a str, index: &'a str, value: &'a [u8]) -> Self {
        Key::Index(
            Cow::Borrowed(type_name),
            Cow::Borrowed(index),
            Cow::Borrowed(value),
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Record(type_name, key) => {
                let mut buf = KeyPrefix::Record(Cow::Borrowed(type_name)).encode();
                buf.extend_from_slice(key);
                buf
            }
            Key::Index(type_name, index, value) => {
                let mut buf =
                    KeyPrefix::Index(Cow::Borrowed(type_name), Cow::Borrowed(index)).encode();
                buf.extend_from_slice(value);
                buf
            }
            Key::Sequence(type_name) => {
                let mut buf = Vec::with_capacity(2 + type_name.len());
                buf.push(SEQUENCE_TAG);
                buf.push(SEP);
                buf.extend_from_slice(type_name.as_bytes());
                buf
            }
        }
    }

    /// Decode a key from its byte representation.
    ///
    /// Returns `None` if the bytes don't match any known key format.
    pub fn decode(bytes: &'a [u8]) -> Option<Key<'a>> {
        if bytes.len() < 2 || bytes[1] != SEP {
            return None;
        }
        let rest = &bytes[2..];
        match bytes[0] {
            RECORD_TAG => {
                let sep = rest.iter().position(|&b| b == SEP)?;
                let type_name = std::str::from_utf8(&rest[..sep]).ok()?;
                Some(Key::Record(
                    Cow::Borrowed(type_name),
                    Cow::Borrowed(&rest[sep + 1..]),
                ))
            }
            INDEX_TAG => {
                let first = rest.iter().position(|&b| b == SEP)?;
                let type_name = std::str::from_utf8(&rest[..first]).ok()?;
                let after_type = &rest[first + 1..];
                let second = after_type.iter().position(|&b| b == SEP)?;
                let index = std::str::from_utf8(&after_type[..second]).ok()?;
                Some(Key::Index(
                    Cow::Borrowed(type_name),
                    Cow::Borrowed(index),
                    Cow::Borrowed(&after_type[second + 1..]),
                ))
            }
            SEQUENCE_TAG => {
                let type_name = std::str::from_utf8(rest).ok()?;
                Some(Key::Sequence(Cow::Borrowed(type_name)))
            }
            _ => None,
        }
    }
}

/// Structured prefix for scan operations.
///
/// - `Record(type)`: every primary record of a type (`r\x00{type}\x00`)
/// - `Index(type, index)`: every entry of one index (`i\x00{type}\x00{index}\x00`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPrefix<'a> {
    Record(Cow<'a, str>),
    Index(Cow<'a, str>, Cow<'a, str>),
}

impl KeyPrefix<'_> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            KeyPrefix::Record(type_name) => {
                let mut buf = Vec::with_capacity(3 + type_name.len());
                buf.push(RECORD_TAG);
                buf.push(SEP);
                buf.extend_from_slice(type_name.as_bytes());
                buf.push(SEP);
                buf
            }
            KeyPrefix::Index(type_name, index) => {
                let mut buf = Vec::with_capacity(4 + type_name.len() + index.len());
                buf.push(INDEX_TAG);
                buf.push(SEP);
                buf.extend_from_slice(type_name.as_bytes());
                buf.push(SEP);
                buf.extend_from_slice(index.as_bytes());
                buf.push(SEP);
                buf
            }
        }
    }
}

// ── Index entry values ───────────────────────────────────────
//
// An index entry holds the ordered list of primary keys sharing a value:
// `[len: 4 BE][key bytes]` repeated.

pub fn encode_key_list(keys: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = keys.iter().map(|k| 4 + k.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for key in keys {
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
    }
    buf
}

/// Returns `None` when the bytes are truncated.
pub fn decode_key_list(mut bytes: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    while !bytes.is_empty() {
        let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let key = bytes.get(4..4 + len)?;
        keys.push(key.to_vec());
        bytes = &bytes[4 + len..];
    }
    Some(keys)
}
