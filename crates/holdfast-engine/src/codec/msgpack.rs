use bson::Bson;

use super::Codec;
use crate::error::CodecError;

/// MessagePack codec for stores that do not want BSON on disk.
///
/// Keys use the same encoding as entities, so index iteration follows byte
/// order of the MessagePack form rather than value order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, value: &Bson) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(CodecError::new)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bson, CodecError> {
        rmp_serde::from_slice(bytes).map_err(CodecError::new)
    }
}
