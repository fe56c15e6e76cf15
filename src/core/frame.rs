// Length-prefixed frame layout: u32 big-endian payload length followed by the payload.
use crate::core::error::{Error, ErrorKind};

pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameRef<'a> {
    payload: &'a [u8],
}

impl<'a> FrameRef<'a> {
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn declared_len(&self) -> u32 {
        // decode_frame only builds frames whose payload came from a u32 length.
        self.payload.len() as u32
    }

    pub fn consumed(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

pub fn decode_frame(buf: &[u8]) -> Result<FrameRef<'_>, Error> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(Error::new(ErrorKind::TruncatedHeader)
            .with_message(format!(
                "frame header needs {FRAME_HEADER_LEN} bytes, buffer has {}",
                buf.len()
            ))
            .with_offset(buf.len() as u64));
    }
    let payload_len = read_u32_be(buf, 0) as usize;
    let available = buf.len() - FRAME_HEADER_LEN;
    if available < payload_len {
        return Err(Error::new(ErrorKind::TruncatedPayload)
            .with_message(format!(
                "frame declares {payload_len} payload bytes, only {available} available"
            ))
            .with_offset(buf.len() as u64));
    }

    let end = FRAME_HEADER_LEN + payload_len;
    if end < buf.len() {
        tracing::debug!(trailing = buf.len() - end, "ignoring bytes after frame");
    }
    tracing::debug!(payload_len, "decoded frame header");
    Ok(FrameRef {
        payload: &buf[FRAME_HEADER_LEN..end],
    })
}

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let len = u32::try_from(payload.len()).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!(
                "payload of {} bytes does not fit a u32 length header",
                payload.len()
            ))
            .with_source(err)
    })?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(out)
}
