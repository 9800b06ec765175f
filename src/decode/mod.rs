//! 文件解码（symphonia）

mod decoder;

pub use decoder::{decode_all, AudioDecoder, AudioInfo, DecodeError, DecodedSource};
