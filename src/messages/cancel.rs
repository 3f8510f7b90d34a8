use bytes::{Buf, BufMut, BytesMut};

use super::{Message, codec};
use crate::error::{GaussWireError, GaussWireResult};

/// Sent on a fresh socket to ask the server to cancel the running query of
/// the session identified by `pid` and `secret_key`.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Clone, Copy, new)]
pub struct CancelRequest {
    pub pid: i32,
    pub secret_key: i32,
}

impl CancelRequest {
    const CANCEL_REQUEST_CODE: i32 = 80877102;

    const CANCEL_REQUEST_MESSAGE_LEN: usize = 16;

    /// try to inspect the buf if it's a cancel request packet
    /// return None if there is not enough bytes to give the result
    pub fn is_cancel_request_packet(buf: &[u8]) -> Option<bool> {
        if buf.len() >= 8 {
            let cancel_code = (&buf[4..8]).get_i32();
            Some(cancel_code == CancelRequest::CANCEL_REQUEST_CODE)
        } else {
            None
        }
    }
}

impl Message for CancelRequest {
    #[inline]
    fn message_length(&self) -> usize {
        Self::CANCEL_REQUEST_MESSAGE_LEN
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i32(CancelRequest::CANCEL_REQUEST_CODE);
        buf.put_i32(self.pid);
        buf.put_i32(self.secret_key);

        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> GaussWireResult<Option<Self>> {
        match Self::is_cancel_request_packet(buf) {
            Some(true) => codec::decode_packet(buf, 0, Self::decode_body),
            Some(false) => Err(GaussWireError::InvalidStartupMessage),
            None => Ok(None),
        }
    }

    fn decode_body(buf: &mut BytesMut, msg_len: usize) -> GaussWireResult<Self> {
        if msg_len != Self::CANCEL_REQUEST_MESSAGE_LEN {
            return Err(GaussWireError::InvalidStartupMessage);
        }

        // skip cancel code
        buf.advance(4);
        let pid = buf.get_i32();
        let secret_key = buf.get_i32();

        Ok(CancelRequest { pid, secret_key })
    }
}
