use bytes::BytesMut;

use super::Message;
use super::codec;
use crate::error::GaussWireResult;

/// A simple query, the whole text may contain several statements.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Query {
    pub query: String,
}

pub const MESSAGE_TYPE_BYTE_QUERY: u8 = b'Q';

impl Message for Query {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_QUERY)
    }

    fn message_length(&self) -> usize {
        5 + self.query.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_cstring(buf, &self.query);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let query = codec::get_cstring_or_empty(buf)?;

        Ok(Query::new(query))
    }
}
