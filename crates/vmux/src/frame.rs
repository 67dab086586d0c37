use byteorder::{BigEndian, ByteOrder};

use crate::error::MuxError;

const TYPE_LEN: usize = 1;
const END_LEN: usize = 1;
const STREAM_ID_LEN: usize = 8;
const HEADER_LEN: usize = TYPE_LEN + END_LEN + STREAM_ID_LEN;

/// Frame type tag carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Raw = 0,
    Start = 1,
    Fin = 2,
}

impl FrameType {
    fn from_u8(v: u8) -> Result<Self, MuxError> {
        match v {
            0 => Ok(FrameType::Raw),
            1 => Ok(FrameType::Start),
            2 => Ok(FrameType::Fin),
            other => Err(MuxError::decode(DecodeFailure::UnknownType(other))),
        }
    }
}

#[derive(Debug)]
enum DecodeFailure {
    UnknownType(u8),
    TooShort(usize),
}

impl std::fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeFailure::UnknownType(t) => write!(f, "unknown frame type {t}"),
            DecodeFailure::TooShort(n) => write!(f, "frame too short: {n} bytes, need at least {HEADER_LEN}"),
        }
    }
}

impl std::error::Error for DecodeFailure {}

/// A decoded wire frame. `data` borrows from the input buffer passed to [`decode`];
/// callers that queue it past the current read must copy it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub typ: FrameType,
    pub end: bool,
    pub stream_id: u64,
    pub data: &'a [u8],
}

/// Encode a frame into a single contiguous big-endian buffer.
pub fn encode(typ: FrameType, end: bool, stream_id: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN + data.len()];
    buf[0] = typ as u8;
    buf[1] = u8::from(end);
    BigEndian::write_u64(&mut buf[TYPE_LEN + END_LEN..HEADER_LEN], stream_id);
    buf[HEADER_LEN..].copy_from_slice(data);
    buf
}

/// Decode a wire frame. Fails if `buf` is shorter than the fixed header.
pub fn decode(buf: &[u8]) -> Result<Frame<'_>, MuxError> {
    if buf.len() < HEADER_LEN {
        return Err(MuxError::decode(DecodeFailure::TooShort(buf.len())));
    }
    let typ = FrameType::from_u8(buf[0])?;
    let end = buf[1] == 1;
    let stream_id = BigEndian::read_u64(&buf[TYPE_LEN + END_LEN..HEADER_LEN]);
    let data = &buf[HEADER_LEN..];
    Ok(Frame { typ, end, stream_id, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_raw() {
        let encoded = encode(FrameType::Raw, false, 42, b"hello");
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.typ, FrameType::Raw);
        assert!(!decoded.end);
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.data, b"hello");
    }

    #[test]
    fn round_trip_empty_payload() {
        let encoded = encode(FrameType::Fin, true, u64::MAX, &[]);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.typ, FrameType::Fin);
        assert!(decoded.end);
        assert_eq!(decoded.stream_id, u64::MAX);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn decode_rejects_short_input() {
        for n in 0..HEADER_LEN {
            let buf = vec![0u8; n];
            assert!(decode(&buf).is_err());
        }
        let buf = vec![0u8; HEADER_LEN];
        assert!(decode(&buf).is_ok());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut encoded = encode(FrameType::Raw, false, 1, b"x");
        encoded[0] = 9;
        assert!(decode(&encoded).is_err());
    }
}
