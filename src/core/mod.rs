// Core modules implementing framing, pickle decoding, JSON conversion, and error modeling.
pub mod convert;
pub mod error;
pub mod frame;
pub mod pickle;
pub mod value;
