mod bson_codec;
mod msgpack;

pub use bson_codec::BsonCodec;
pub use msgpack::MsgPackCodec;

use bson::Bson;

use crate::error::CodecError;

/// Pluggable encode/decode pair for stored values.
///
/// Entities travel as `Bson` between the typed API and the codec. Key and
/// index values go through `encode_key`/`decode_key`, which default to the
/// entity encoding. A codec whose key encoding preserves value order gives
/// index iteration in value order.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Bson) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Bson, CodecError>;

    fn encode_key(&self, value: &Bson) -> Result<Vec<u8>, CodecError> {
        self.encode(value)
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Bson, CodecError> {
        self.decode(bytes)
    }

    /// Whether encoded keys sort like the values they encode and decode back
    /// to the same kind.
    fn ordered_keys(&self) -> bool {
        false
    }
}
