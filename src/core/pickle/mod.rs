// Pickle opcode stream: decoding into `DecodedValue` and protocol 2 encoding.
mod decode;
mod encode;
pub mod opcode;
mod text;

pub use decode::{
    DEFAULT_MAX_BYTES, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES, DecodeLimits, decode,
    decode_with_limits,
};
pub use encode::encode;
