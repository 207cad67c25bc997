//! Wire-format primitives shared by the SFTP and agent codecs.
//!
//! Both protocols frame their payloads with big-endian `u32` lengths and
//! length-prefixed strings, per RFC 4251 data type encodings.

use bytes::{Buf, BufMut};
use hawser_platform::{code, HawserError, HawserResult};

/// Appends a length-prefixed byte string.
pub(crate) fn put_string(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

/// Reads a big-endian `u32`, failing on short input.
pub(crate) fn get_u32(buf: &mut impl Buf) -> HawserResult<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

/// Reads a big-endian `u64`, failing on short input.
pub(crate) fn get_u64(buf: &mut impl Buf) -> HawserResult<u64> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_u64())
}

/// Reads a length-prefixed byte string.
pub(crate) fn get_string(buf: &mut impl Buf) -> HawserResult<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a length-prefixed UTF-8 string, replacing invalid sequences.
pub(crate) fn get_text(buf: &mut impl Buf) -> HawserResult<String> {
    Ok(String::from_utf8_lossy(&get_string(buf)?).into_owned())
}

fn truncated() -> HawserError {
    HawserError::protocol(code::PROTO, "truncated wire message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, b"payload");
        let mut rd = buf.freeze();
        assert_eq!(get_string(&mut rd).unwrap(), b"payload");
        assert!(!rd.has_remaining());
    }

    #[test]
    fn test_truncated_string_is_protocol_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(b"short");
        let mut rd = buf.freeze();
        let err = get_string(&mut rd).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_integer_reads_fail() {
        let mut rd = &b"\x00\x01"[..];
        assert!(get_u32(&mut rd).is_err());
        let mut rd = &b"\x00\x00\x00\x01"[..];
        assert!(get_u64(&mut rd).is_err());
    }
}
