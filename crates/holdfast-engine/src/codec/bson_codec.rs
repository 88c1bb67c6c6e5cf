use bson::oid::ObjectId;
use bson::spec::{BinarySubtype, ElementType};
use bson::{Binary, Bson, DateTime, Document, doc};

use super::Codec;
use crate::error::CodecError;

// ── Sortable encoding helpers ──────────────────────────────────
//
// Key bytes must compare like the values they encode. Signed integers:
// flip the sign bit, then big-endian. Doubles: if positive flip the sign
// bit, if negative flip all bits.

#[inline]
fn encode_i64_sortable(n: i64) -> [u8; 8] {
    ((n as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

#[inline]
fn decode_i64_sortable(b: [u8; 8]) -> i64 {
    (u64::from_be_bytes(b) ^ 0x8000_0000_0000_0000) as i64
}

#[inline]
fn encode_f64_sortable(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let encoded = if (bits & 0x8000_0000_0000_0000) != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    };
    encoded.to_be_bytes()
}

#[inline]
fn decode_f64_sortable(b: [u8; 8]) -> f64 {
    let encoded = u64::from_be_bytes(b);
    let bits = if (encoded & 0x8000_0000_0000_0000) != 0 {
        encoded ^ 0x8000_0000_0000_0000
    } else {
        !encoded
    };
    f64::from_bits(bits)
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::msg(format!("malformed {what} key: expected {N} bytes, got {}", bytes.len())))
}

/// Default codec: entities are stored as BSON documents, keys and index
/// values use a type-tagged order-preserving encoding.
///
/// `Int32` keys are widened to `Int64` so a key written as `5i32` and one
/// queried as `5i64` share the same bytes. Composite values (documents,
/// arrays, anything without a natural byte order) fall back to their BSON
/// bytes under an embedded-document tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonCodec;

impl Codec for BsonCodec {
    fn name(&self) -> &'static str {
        "bson"
    }

    fn ordered_keys(&self) -> bool {
        true
    }

    fn encode(&self, value: &Bson) -> Result<Vec<u8>, CodecError> {
        Ok(bson::serialize_to_vec(&doc! { "v": value.clone() })?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bson, CodecError> {
        let mut doc: Document = bson::deserialize_from_slice(bytes)?;
        doc.remove("v")
            .ok_or_else(|| CodecError::msg("encoded value is missing its payload"))
    }

    fn encode_key(&self, value: &Bson) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(9);
        match value {
            Bson::Null => buf.push(ElementType::Null as u8),
            Bson::Boolean(b) => {
                buf.push(ElementType::Boolean as u8);
                buf.push(*b as u8);
            }
            Bson::Int32(n) => {
                buf.push(ElementType::Int64 as u8);
                buf.extend_from_slice(&encode_i64_sortable(i64::from(*n)));
            }
            Bson::Int64(n) => {
                buf.push(ElementType::Int64 as u8);
                buf.extend_from_slice(&encode_i64_sortable(*n));
            }
            Bson::Double(f) => {
                buf.push(ElementType::Double as u8);
                buf.extend_from_slice(&encode_f64_sortable(*f));
            }
            Bson::String(s) => {
                buf.push(ElementType::String as u8);
                buf.extend_from_slice(s.as_bytes());
            }
            Bson::DateTime(dt) => {
                buf.push(ElementType::DateTime as u8);
                buf.extend_from_slice(&encode_i64_sortable(dt.timestamp_millis()));
            }
            Bson::ObjectId(oid) => {
                buf.push(ElementType::ObjectId as u8);
                buf.extend_from_slice(&oid.bytes());
            }
            Bson::Binary(bin) => {
                buf.push(ElementType::Binary as u8);
                buf.push(u8::from(bin.subtype));
                buf.extend_from_slice(&bin.bytes);
            }
            other => {
                buf.push(ElementType::EmbeddedDocument as u8);
                buf.extend_from_slice(&self.encode(other)?);
            }
        }
        Ok(buf)
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Bson, CodecError> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| CodecError::msg("empty key"))?;
        let value = match ElementType::from(tag) {
            Some(ElementType::Null) => Bson::Null,
            Some(ElementType::Boolean) => Bson::Boolean(fixed::<1>(rest, "boolean")?[0] != 0),
            Some(ElementType::Int64) => Bson::Int64(decode_i64_sortable(fixed(rest, "integer")?)),
            Some(ElementType::Double) => Bson::Double(decode_f64_sortable(fixed(rest, "double")?)),
            Some(ElementType::String) => Bson::String(
                String::from_utf8(rest.to_vec()).map_err(CodecError::new)?,
            ),
            Some(ElementType::DateTime) => Bson::DateTime(DateTime::from_millis(
                decode_i64_sortable(fixed(rest, "datetime")?),
            )),
            Some(ElementType::ObjectId) => {
                Bson::ObjectId(ObjectId::from_bytes(fixed(rest, "object id")?))
            }
            Some(ElementType::Binary) => {
                let (&subtype, data) = rest
                    .split_first()
                    .ok_or_else(|| CodecError::msg("malformed binary key"))?;
                Bson::Binary(Binary {
                    subtype: BinarySubtype::from(subtype),
                    bytes: data.to_vec(),
                })
            }
            Some(ElementType::EmbeddedDocument) => self.decode(rest)?,
            _ => return Err(CodecError::msg(format!("unknown key tag 0x{tag:02x}"))),
        };
        Ok(value)
    }
}
