use bytes::{Buf, BufMut, BytesMut};

use super::Message;
use super::codec;
use crate::error::{GaussWireError, GaussWireResult};

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct CommandComplete {
    pub tag: String,
}

pub const MESSAGE_TYPE_BYTE_COMMAND_COMPLETE: u8 = b'C';

impl Message for CommandComplete {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_COMMAND_COMPLETE)
    }

    fn message_length(&self) -> usize {
        5 + self.tag.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_cstring(buf, &self.tag);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let tag = codec::get_cstring_or_empty(buf)?;
        Ok(CommandComplete::new(tag))
    }
}

#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct EmptyQueryResponse;

pub const MESSAGE_TYPE_BYTE_EMPTY_QUERY_RESPONSE: u8 = b'I';

impl Message for EmptyQueryResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_EMPTY_QUERY_RESPONSE)
    }

    fn message_length(&self) -> usize {
        4
    }

    fn encode_body(&self, _buf: &mut BytesMut) -> GaussWireResult<()> {
        Ok(())
    }

    fn decode_body(_buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        Ok(EmptyQueryResponse)
    }
}

/// Transaction status reported by every `ReadyForQuery`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    Transaction,
    Error,
}

impl TransactionStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => READY_STATUS_IDLE,
            TransactionStatus::Transaction => READY_STATUS_TRANSACTION_BLOCK,
            TransactionStatus::Error => READY_STATUS_FAILED_TRANSACTION_BLOCK,
        }
    }
}

impl TryFrom<u8> for TransactionStatus {
    type Error = GaussWireError;

    fn try_from(value: u8) -> Result<Self, GaussWireError> {
        match value {
            READY_STATUS_IDLE => Ok(TransactionStatus::Idle),
            READY_STATUS_TRANSACTION_BLOCK => Ok(TransactionStatus::Transaction),
            READY_STATUS_FAILED_TRANSACTION_BLOCK => Ok(TransactionStatus::Error),
            _ => Err(GaussWireError::InvalidTransactionStatus(value)),
        }
    }
}

/// `ReadyForQuery`, the end of every request cycle.
///
/// openGauss servers with column encryption enabled append one byte telling
/// the client logic engine whether its cached key metadata must be
/// refreshed.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
    pub refresh: Option<u8>,
}

pub const READY_STATUS_IDLE: u8 = b'I';
pub const READY_STATUS_TRANSACTION_BLOCK: u8 = b'T';
pub const READY_STATUS_FAILED_TRANSACTION_BLOCK: u8 = b'E';

pub const MESSAGE_TYPE_BYTE_READY_FOR_QUERY: u8 = b'Z';

impl Message for ReadyForQuery {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_READY_FOR_QUERY)
    }

    #[inline]
    fn message_length(&self) -> usize {
        5 + self.refresh.map(|_| 1).unwrap_or(0)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_u8(self.status.to_byte());
        if let Some(refresh) = self.refresh {
            buf.put_u8(refresh);
        }
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 1, "ReadyForQuery")?;
        let status = TransactionStatus::try_from(buf.get_u8())?;
        let refresh = if buf.has_remaining() {
            Some(buf.get_u8())
        } else {
            None
        };
        Ok(ReadyForQuery::new(status, refresh))
    }
}

fn fields_length(fields: &[(u8, String)]) -> usize {
    4 + fields.iter().map(|f| 1 + f.1.len() + 1).sum::<usize>() + 1
}

fn encode_fields(fields: &[(u8, String)], buf: &mut BytesMut) {
    for (code, value) in fields {
        buf.put_u8(*code);
        codec::put_cstring(buf, value);
    }
    buf.put_u8(b'\0');
}

fn decode_fields(buf: &mut BytesMut) -> GaussWireResult<Vec<(u8, String)>> {
    let mut fields = Vec::new();
    loop {
        codec::ensure_remaining(buf, 1, "ErrorResponse")?;
        let code = buf.get_u8();
        if code == b'\0' {
            return Ok(fields);
        }
        let value = codec::get_cstring_or_empty(buf)?;
        fields.push((code, value));
    }
}

/// postgres error response, sent from backend to frontend
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct ErrorResponse {
    pub fields: Vec<(u8, String)>,
}

pub const MESSAGE_TYPE_BYTE_ERROR_RESPONSE: u8 = b'E';

impl Message for ErrorResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_ERROR_RESPONSE)
    }

    fn message_length(&self) -> usize {
        fields_length(&self.fields)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        encode_fields(&self.fields, buf);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        decode_fields(buf).map(ErrorResponse::new)
    }
}

/// postgres notice response, sent from backend to frontend
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Default, new)]
pub struct NoticeResponse {
    pub fields: Vec<(u8, String)>,
}

pub const MESSAGE_TYPE_BYTE_NOTICE_RESPONSE: u8 = b'N';

impl Message for NoticeResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_NOTICE_RESPONSE)
    }

    fn message_length(&self) -> usize {
        fields_length(&self.fields)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        encode_fields(&self.fields, buf);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        decode_fields(buf).map(NoticeResponse::new)
    }
}

/// Asynchronous notification raised by `NOTIFY` on a channel this session
/// listens to.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Clone, new)]
pub struct NotificationResponse {
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

pub const MESSAGE_TYPE_BYTE_NOTIFICATION_RESPONSE: u8 = b'A';

impl Message for NotificationResponse {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_NOTIFICATION_RESPONSE)
    }

    fn message_length(&self) -> usize {
        4 + 4 + self.channel.len() + 1 + self.payload.len() + 1
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i32(self.pid);
        codec::put_cstring(buf, &self.channel);
        codec::put_cstring(buf, &self.payload);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 4, "NotificationResponse")?;
        let pid = buf.get_i32();
        let channel = codec::get_cstring_or_empty(buf)?;
        let payload = codec::get_cstring_or_empty(buf)?;
        Ok(NotificationResponse::new(pid, channel, payload))
    }
}
