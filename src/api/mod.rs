//! Purpose: Define the public Rust API boundary for pickleframe.
//! Exports: Framing, pickle decode/encode, JSON conversion, and error types.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only public path to core primitives.
//! Invariants: Offsets in errors from `decode_buffer`/`buffer_to_json` are buffer-relative.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::convert::{
    ConversionRule, Converter, SET_CLASSES, sets_as_arrays, to_json, to_json_pretty,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::frame::{FRAME_HEADER_LEN, FrameRef, decode_frame, encode_frame};
pub use crate::core::pickle::{
    self, DEFAULT_MAX_BYTES, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES, DecodeLimits,
};
pub use crate::core::value::DecodedValue;

/// Decodes the frame at the start of `buf` and its pickle payload.
pub fn decode_buffer(buf: &[u8], converter: &Converter) -> Result<DecodedValue, Error> {
    let frame = decode_frame(buf)?;
    converter
        .decode(frame.payload())
        .map_err(|err| err.shift_offset(FRAME_HEADER_LEN as u64))
}

/// Compact JSON text for the frame at the start of `buf`.
pub fn buffer_to_json(buf: &[u8], converter: &Converter) -> Result<String, Error> {
    let value = decode_buffer(buf, converter)?;
    let json = converter.to_json_value(&value)?;
    serde_json::to_string(&json).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{Converter, ErrorKind, buffer_to_json, decode_buffer};

    #[test]
    fn scenario_frames() {
        let converter = Converter::new();
        let int42 = [0, 0, 0, 5, b'I', b'4', b'2', b'\n', b'.'];
        assert_eq!(buffer_to_json(&int42, &converter).unwrap(), "42");

        let empty = [0, 0, 0, 0];
        let err = buffer_to_json(&empty, &converter).expect_err("empty payload");
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);

        let short = [0, 0, 0, 0x0A, 1, 2, 3, 4, 5];
        let err = buffer_to_json(&short, &converter).expect_err("short payload");
        assert_eq!(err.kind(), ErrorKind::TruncatedPayload);
    }

    #[test]
    fn payload_offsets_are_buffer_relative() {
        let buf = [0, 0, 0, 3, b'K', 1, 0xff];
        let err = decode_buffer(&buf, &Converter::new()).expect_err("unknown opcode");
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(err.offset(), Some(6));
    }
}
