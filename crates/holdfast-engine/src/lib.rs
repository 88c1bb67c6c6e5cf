mod codec;
mod cursor;
mod document;
mod error;
mod index;
mod key;
mod schema;
mod sequence;

pub use codec::{BsonCodec, Codec, MsgPackCodec};
pub use cursor::{Bookmark, Candidate, Cursor, ScanSource};
pub use document::{lookup, lookup_or_null};
pub use error::{CodecError, EngineError};
pub use index::IndexManager;
pub use key::{Key, KeyPrefix, decode_key_list, encode_key_list};
pub use schema::{Entity, EntitySchema, IndexSpec, SchemaRegistry};
pub use sequence::next_sequence;
