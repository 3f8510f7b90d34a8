use std::str;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{GaussWireError, GaussWireResult};

/// Frames larger than this are rejected before any allocation happens.
pub const MAX_FRAME_LENGTH: usize = 1 << 30;

/// Get null-terminated string, returns None when empty cstring read.
///
/// Note that this implementation will also advance cursor by 1 after reading
/// empty cstring. This behaviour works for how postgres wire protocol handling
/// key-value pairs, which is ended by a single `\0`
pub(crate) fn get_cstring(buf: &mut BytesMut) -> GaussWireResult<Option<String>> {
    let Some(i) = buf.iter().position(|b| *b == b'\0') else {
        return Err(GaussWireError::MalformedMessage("cstring"));
    };

    // i+1: include the '\0'
    let string_buf = buf.split_to(i + 1);
    if i == 0 {
        Ok(None)
    } else {
        str::from_utf8(&string_buf[..i])
            .map(|s| Some(s.to_owned()))
            .map_err(GaussWireError::InvalidUtf8)
    }
}

/// Get null-terminated string, empty string when `\0` is read directly.
pub(crate) fn get_cstring_or_empty(buf: &mut BytesMut) -> GaussWireResult<String> {
    get_cstring(buf).map(Option::unwrap_or_default)
}

/// Put null-termianted string
///
/// You can put empty string by giving `""` as input.
pub(crate) fn put_cstring(buf: &mut BytesMut, input: &str) {
    buf.put_slice(input.as_bytes());
    buf.put_u8(b'\0');
}

/// Put null-terminated string, an empty string for `None`.
pub(crate) fn put_option_cstring(buf: &mut BytesMut, input: &Option<String>) {
    put_cstring(buf, input.as_deref().unwrap_or(""));
}

/// Encoded length of an optional cstring including its terminator.
pub(crate) fn option_string_len(input: &Option<String>) -> usize {
    1 + input.as_ref().map(|s| s.len()).unwrap_or(0)
}

/// Ensure `len` bytes are readable before calling the panicking `get_*`
/// accessors of `Buf`.
pub(crate) fn ensure_remaining(
    buf: &BytesMut,
    len: usize,
    what: &'static str,
) -> GaussWireResult<()> {
    if buf.remaining() < len {
        Err(GaussWireError::MalformedMessage(what))
    } else {
        Ok(())
    }
}

/// Decode one frame whose length field starts at `offset`.
///
/// Returns `Ok(None)` until the whole frame is buffered. On success the frame
/// is consumed from `buf` and `decode_fn` receives the body only, together
/// with the value of the length field. Bytes left unread by `decode_fn` are
/// discarded so a lenient body decoder never desynchronizes the stream.
pub(crate) fn decode_packet<T, F>(
    buf: &mut BytesMut,
    offset: usize,
    decode_fn: F,
) -> GaussWireResult<Option<T>>
where
    F: Fn(&mut BytesMut, usize) -> GaussWireResult<T>,
{
    if buf.remaining() < offset + 4 {
        return Ok(None);
    }

    let msg_len = (&buf[offset..offset + 4]).get_i32();
    if msg_len < 4 {
        return Err(GaussWireError::MalformedMessage("frame length"));
    }
    let msg_len = msg_len as usize;
    if msg_len > MAX_FRAME_LENGTH {
        return Err(GaussWireError::MessageTooLarge(msg_len, MAX_FRAME_LENGTH));
    }

    if buf.remaining() < offset + msg_len {
        // reserve what is missing so the next read fills the frame at once
        buf.reserve(offset + msg_len - buf.remaining());
        return Ok(None);
    }

    let mut frame = buf.split_to(offset + msg_len);
    frame.advance(offset + 4);
    decode_fn(&mut frame, msg_len).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cstring() {
        let mut buf = BytesMut::from(&b"user\0omm\0\0rest"[..]);
        assert_eq!(Some("user".to_owned()), get_cstring(&mut buf).unwrap());
        assert_eq!(Some("omm".to_owned()), get_cstring(&mut buf).unwrap());
        assert_eq!(None, get_cstring(&mut buf).unwrap());
        assert_eq!(&b"rest"[..], &buf[..]);

        let mut unterminated = BytesMut::from(&b"abc"[..]);
        assert!(get_cstring(&mut unterminated).is_err());
    }

    #[test]
    fn test_decode_packet_waits_for_full_frame() {
        let mut buf = BytesMut::from(&b"Z\0\0\0"[..]);
        let r = decode_packet(&mut buf, 1, |b, _| Ok(b.get_u8())).unwrap();
        assert!(r.is_none());

        buf.extend_from_slice(b"\x05I");
        let r = decode_packet(&mut buf, 1, |b, _| Ok(b.get_u8())).unwrap();
        assert_eq!(Some(b'I'), r);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_packet_rejects_bad_length() {
        let mut buf = BytesMut::from(&b"Z\0\0\0\x02"[..]);
        assert!(decode_packet(&mut buf, 1, |b, _| Ok(b.get_u8())).is_err());

        let mut buf = BytesMut::from(&b"D\x7f\xff\xff\xff"[..]);
        assert!(matches!(
            decode_packet(&mut buf, 1, |b, _| Ok(b.get_u8())),
            Err(GaussWireError::MessageTooLarge(..))
        ));
    }
}
