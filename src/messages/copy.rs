use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Message;
use super::codec;
use crate::error::GaussWireResult;

pub const MESSAGE_TYPE_BYTE_COPY_DATA: u8 = b'd';

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct CopyData {
    pub data: Bytes,
}

impl Message for CopyData {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COPY_DATA)
    }

    fn message_length(&self) -> usize {
        4 + self.data.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_slice(&self.data);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, len: usize) -> GaussWireResult<Self> {
        let data = buf.split_to(len - 4).freeze();
        Ok(Self::new(data))
    }
}

pub const MESSAGE_TYPE_BYTE_COPY_DONE: u8 = b'c';

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct CopyDone;

impl Message for CopyDone {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COPY_DONE)
    }

    fn message_length(&self) -> usize {
        4
    }

    fn encode_body(&self, _buf: &mut BytesMut) -> GaussWireResult<()> {
        Ok(())
    }

    fn decode_body(_buf: &mut BytesMut, _len: usize) -> GaussWireResult<Self> {
        Ok(Self::new())
    }
}

pub const MESSAGE_TYPE_BYTE_COPY_FAIL: u8 = b'f';

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct CopyFail {
    pub message: String,
}

impl Message for CopyFail {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COPY_FAIL)
    }

    fn message_length(&self) -> usize {
        4 + self.message.len() + 1
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_cstring(buf, &self.message);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _len: usize) -> GaussWireResult<Self> {
        let msg = codec::get_cstring_or_empty(buf)?;
        Ok(Self::new(msg))
    }
}

/// Overall format: 0 textual, 1 binary.
pub const COPY_FORMAT_TEXT: i8 = 0;
pub const COPY_FORMAT_BINARY: i8 = 1;

fn copy_response_length(column_formats: &[i16]) -> usize {
    4 + 1 + 2 + column_formats.len() * 2
}

fn encode_copy_response(buf: &mut BytesMut, format: i8, columns: i16, column_formats: &[i16]) {
    buf.put_i8(format);
    buf.put_i16(columns);
    for cf in column_formats {
        buf.put_i16(*cf);
    }
}

fn decode_copy_response(buf: &mut BytesMut) -> GaussWireResult<(i8, i16, Vec<i16>)> {
    codec::ensure_remaining(buf, 3, "CopyResponse")?;
    let format = buf.get_i8();
    let columns = buf.get_i16();
    let count = columns.max(0) as usize;
    codec::ensure_remaining(buf, count * 2, "CopyResponse")?;
    let column_formats = (0..count).map(|_| buf.get_i16()).collect();
    Ok((format, columns, column_formats))
}

pub const MESSAGE_TYPE_BYTE_COPY_IN_RESPONSE: u8 = b'G';

/// The server is ready to receive `COPY FROM STDIN` data.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct CopyInResponse {
    pub format: i8,
    pub columns: i16,
    pub column_formats: Vec<i16>,
}

impl Message for CopyInResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COPY_IN_RESPONSE)
    }

    fn message_length(&self) -> usize {
        copy_response_length(&self.column_formats)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        encode_copy_response(buf, self.format, self.columns, &self.column_formats);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _len: usize) -> GaussWireResult<Self> {
        let (format, columns, column_formats) = decode_copy_response(buf)?;
        Ok(Self::new(format, columns, column_formats))
    }
}

pub const MESSAGE_TYPE_BYTE_COPY_OUT_RESPONSE: u8 = b'H';

/// The server is about to stream `COPY TO STDOUT` data, which this client
/// refuses.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct CopyOutResponse {
    pub format: i8,
    pub columns: i16,
    pub column_formats: Vec<i16>,
}

impl Message for CopyOutResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COPY_OUT_RESPONSE)
    }

    fn message_length(&self) -> usize {
        copy_response_length(&self.column_formats)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        encode_copy_response(buf, self.format, self.columns, &self.column_formats);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _len: usize) -> GaussWireResult<Self> {
        let (format, columns, column_formats) = decode_copy_response(buf)?;
        Ok(Self::new(format, columns, column_formats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_fail_type_byte() {
        let mut buf = BytesMut::new();
        CopyFail::new("stop".to_owned()).encode(&mut buf).unwrap();
        assert_eq!(MESSAGE_TYPE_BYTE_COPY_FAIL, buf[0]);
    }
}
