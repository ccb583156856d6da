//! Record frame format.
//!
//! Every record in the compressed stream is framed as:
//! - Key length (4 bytes, little-endian)
//! - Value length (4 bytes, little-endian)
//! - Key (variable)
//! - Value (variable)

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::ops::Range;

/// Size of the frame header (key length + value length)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the key in bytes
    pub key_len: u32,
    /// Length of the value in bytes
    pub value_len: u32,
}

impl FrameHeader {
    /// Parse a header from the front of `buf`, if enough bytes are present.
    pub fn peek(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let key_len = buf.get_u32_le();
        let value_len = buf.get_u32_le();
        Some(Self { key_len, value_len })
    }

    /// Total encoded size of the frame, header included.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.key_len as usize + self.value_len as usize
    }

    /// Byte range of the key, relative to the frame start.
    pub fn key_range(&self) -> Range<usize> {
        FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + self.key_len as usize
    }

    /// Byte range of the value, relative to the frame start.
    pub fn value_range(&self) -> Range<usize> {
        let start = FRAME_HEADER_SIZE + self.key_len as usize;
        start..start + self.value_len as usize
    }
}

/// Encoded size of a record.
pub fn encoded_len(key: &[u8], value: &[u8]) -> usize {
    FRAME_HEADER_SIZE + key.len() + value.len()
}

/// Append the frame for `(key, value)` to `buf`.
pub fn encode_into(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> Result<()> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| Error::invalid_argument(format!("key too large: {} bytes", key.len())))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| Error::invalid_argument(format!("value too large: {} bytes", value.len())))?;

    buf.reserve(encoded_len(key, value));
    buf.put_u32_le(key_len);
    buf.put_u32_le(value_len);
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(())
}

/// Decode the frame at the front of `buf`.
///
/// Returns the key, the value and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(&[u8], &[u8], usize)> {
    let header = FrameHeader::peek(buf).ok_or_else(|| {
        Error::truncated(format!("frame header needs {} bytes, got {}", FRAME_HEADER_SIZE, buf.len()))
    })?;

    let len = header.frame_len();
    if buf.len() < len {
        return Err(Error::truncated(format!(
            "frame declares {} bytes, only {} available",
            len,
            buf.len()
        )));
    }

    Ok((&buf[header.key_range()], &buf[header.value_range()], len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        encode_into(&mut buf, b"ab", b"xyz").unwrap();

        assert_eq!(buf.len(), encoded_len(b"ab", b"xyz"));
        assert_eq!(&buf[0..4], &2u32.to_le_bytes());
        assert_eq!(&buf[4..8], &3u32.to_le_bytes());
        assert_eq!(&buf[8..], b"abxyz");
    }

    #[test]
    fn test_decode_sequence() {
        let mut buf = Vec::new();
        encode_into(&mut buf, b"key1", b"value1").unwrap();
        encode_into(&mut buf, b"", b"").unwrap();

        let (key, value, used) = decode(&buf).unwrap();
        assert_eq!(key, b"key1");
        assert_eq!(value, b"value1");

        let (key, value, rest) = decode(&buf[used..]).unwrap();
        assert!(key.is_empty());
        assert!(value.is_empty());
        assert_eq!(used + rest, buf.len());
    }

    #[test]
    fn test_decode_short_header() {
        let result = decode(&[1, 0, 0]);
        assert!(matches!(result, Err(Error::Truncated(_))));
    }

    #[test]
    fn test_decode_short_payload() {
        let mut buf = Vec::new();
        encode_into(&mut buf, b"key", b"value").unwrap();
        buf.pop();

        let result = decode(&buf);
        assert!(matches!(result, Err(Error::Truncated(_))));
    }

    #[test]
    fn test_peek_header() {
        let mut buf = Vec::new();
        encode_into(&mut buf, b"k", b"vv").unwrap();

        let header = FrameHeader::peek(&buf[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(header, FrameHeader { key_len: 1, value_len: 2 });
        assert_eq!(header.frame_len(), 11);
        assert_eq!(header.key_range(), 8..9);
        assert_eq!(header.value_range(), 9..11);
        assert!(FrameHeader::peek(&buf[..4]).is_none());
    }
}
