//! openGauss wire protocol messages
//!
//! Every message implements [`Message`], which knows how to frame itself as
//! `[type byte][i32 length including itself][body]`. Frontend messages are
//! the ones this crate sends, backend messages the ones it receives. Both
//! directions can be encoded and decoded so test servers can be written with
//! the same types.
use bytes::{Buf, BufMut, BytesMut};

use crate::error::{GaussWireError, GaussWireResult};

pub(crate) mod codec;

pub mod cancel;
pub mod copy;
pub mod data;
pub mod extendedquery;
pub mod response;
pub mod simplequery;
pub mod startup;
pub mod terminate;

pub trait Message: Sized {
    /// Return the type code of the message. In order to maintain backward
    /// compatibility, `Startup` has no message type.
    #[inline]
    fn message_type() -> Option<u8> {
        None
    }

    /// Return the length of the message, including the length integer itself.
    fn message_length(&self) -> usize;

    /// Encode body part of the message.
    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()>;

    /// Decode body part of the message.
    fn decode_body(buf: &mut BytesMut, full_len: usize) -> GaussWireResult<Self>;

    /// Default implementation for encoding message.
    ///
    /// Message type and length are encoded in this implementation and it
    /// calls `encode_body` for remaining parts.
    fn encode(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        if let Some(mt) = Self::message_type() {
            buf.put_u8(mt);
        }

        buf.put_i32(self.message_length() as i32);
        self.encode_body(buf)
    }

    /// Default implementation for decoding message.
    ///
    /// Message type and length are decoded in this implementation and it
    /// calls `decode_body` for remaining parts. Return `None` if the packet
    /// is not complete for parsing.
    fn decode(buf: &mut BytesMut) -> GaussWireResult<Option<Self>> {
        let offset = Self::message_type().is_some().into();

        codec::decode_packet(buf, offset, Self::decode_body)
    }
}

/// Messages sent from the client.
#[derive(Debug)]
pub enum FrontendMessage {
    // startup
    Startup(startup::Startup),
    SslRequest(startup::SslRequest),
    CancelRequest(cancel::CancelRequest),
    Password(startup::Password),

    // simple query
    Query(simplequery::Query),

    // extended query
    Parse(extendedquery::Parse),
    Bind(extendedquery::Bind),
    BatchBind(extendedquery::BatchBind),
    Describe(extendedquery::Describe),
    Execute(extendedquery::Execute),
    Close(extendedquery::Close),
    Sync(extendedquery::Sync),
    Flush(extendedquery::Flush),

    // copy
    CopyData(copy::CopyData),
    CopyDone(copy::CopyDone),
    CopyFail(copy::CopyFail),

    Terminate(terminate::Terminate),
}

impl FrontendMessage {
    pub fn encode(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        match self {
            Self::Startup(msg) => msg.encode(buf),
            Self::SslRequest(msg) => msg.encode(buf),
            Self::CancelRequest(msg) => msg.encode(buf),
            Self::Password(msg) => msg.encode(buf),
            Self::Query(msg) => msg.encode(buf),
            Self::Parse(msg) => msg.encode(buf),
            Self::Bind(msg) => msg.encode(buf),
            Self::BatchBind(msg) => msg.encode(buf),
            Self::Describe(msg) => msg.encode(buf),
            Self::Execute(msg) => msg.encode(buf),
            Self::Close(msg) => msg.encode(buf),
            Self::Sync(msg) => msg.encode(buf),
            Self::Flush(msg) => msg.encode(buf),
            Self::CopyData(msg) => msg.encode(buf),
            Self::CopyDone(msg) => msg.encode(buf),
            Self::CopyFail(msg) => msg.encode(buf),
            Self::Terminate(msg) => msg.encode(buf),
        }
    }

    /// Decode a typed frontend message.
    ///
    /// The untyped startup phase messages (`Startup`, `SslRequest`,
    /// `CancelRequest`) must be decoded with their own `decode`.
    pub fn decode(buf: &mut BytesMut) -> GaussWireResult<Option<Self>> {
        if buf.remaining() < 1 {
            return Ok(None);
        }

        match buf[0] {
            startup::MESSAGE_TYPE_BYTE_PASSWORD => {
                startup::Password::decode(buf).map(|v| v.map(Self::Password))
            }
            simplequery::MESSAGE_TYPE_BYTE_QUERY => {
                simplequery::Query::decode(buf).map(|v| v.map(Self::Query))
            }
            extendedquery::MESSAGE_TYPE_BYTE_PARSE => {
                extendedquery::Parse::decode(buf).map(|v| v.map(Self::Parse))
            }
            extendedquery::MESSAGE_TYPE_BYTE_BIND => {
                extendedquery::Bind::decode(buf).map(|v| v.map(Self::Bind))
            }
            extendedquery::MESSAGE_TYPE_BYTE_BATCH_BIND => {
                extendedquery::BatchBind::decode(buf).map(|v| v.map(Self::BatchBind))
            }
            extendedquery::MESSAGE_TYPE_BYTE_DESCRIBE => {
                extendedquery::Describe::decode(buf).map(|v| v.map(Self::Describe))
            }
            extendedquery::MESSAGE_TYPE_BYTE_EXECUTE => {
                extendedquery::Execute::decode(buf).map(|v| v.map(Self::Execute))
            }
            extendedquery::MESSAGE_TYPE_BYTE_CLOSE => {
                extendedquery::Close::decode(buf).map(|v| v.map(Self::Close))
            }
            extendedquery::MESSAGE_TYPE_BYTE_SYNC => {
                extendedquery::Sync::decode(buf).map(|v| v.map(Self::Sync))
            }
            extendedquery::MESSAGE_TYPE_BYTE_FLUSH => {
                extendedquery::Flush::decode(buf).map(|v| v.map(Self::Flush))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_DATA => {
                copy::CopyData::decode(buf).map(|v| v.map(Self::CopyData))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_DONE => {
                copy::CopyDone::decode(buf).map(|v| v.map(Self::CopyDone))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_FAIL => {
                copy::CopyFail::decode(buf).map(|v| v.map(Self::CopyFail))
            }
            terminate::MESSAGE_TYPE_BYTE_TERMINATE => {
                terminate::Terminate::decode(buf).map(|v| v.map(Self::Terminate))
            }
            t => Err(GaussWireError::InvalidMessageType(t)),
        }
    }
}

/// Messages sent from the server.
#[derive(Debug)]
pub enum BackendMessage {
    // startup
    Authentication(startup::Authentication),
    ParameterStatus(startup::ParameterStatus),
    BackendKeyData(startup::BackendKeyData),

    // extended query
    ParseComplete(extendedquery::ParseComplete),
    BindComplete(extendedquery::BindComplete),
    CloseComplete(extendedquery::CloseComplete),
    ParameterDescription(extendedquery::ParameterDescription),
    NoData(extendedquery::NoData),
    PortalSuspended(extendedquery::PortalSuspended),

    // command response
    CommandComplete(response::CommandComplete),
    EmptyQueryResponse(response::EmptyQueryResponse),
    ReadyForQuery(response::ReadyForQuery),
    ErrorResponse(response::ErrorResponse),
    NoticeResponse(response::NoticeResponse),
    NotificationResponse(response::NotificationResponse),

    // data
    RowDescription(data::RowDescription),
    DataRow(data::DataRow),

    // copy
    CopyData(copy::CopyData),
    CopyDone(copy::CopyDone),
    CopyInResponse(copy::CopyInResponse),
    CopyOutResponse(copy::CopyOutResponse),
}

impl BackendMessage {
    pub fn encode(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        match self {
            Self::Authentication(msg) => msg.encode(buf),
            Self::ParameterStatus(msg) => msg.encode(buf),
            Self::BackendKeyData(msg) => msg.encode(buf),
            Self::ParseComplete(msg) => msg.encode(buf),
            Self::BindComplete(msg) => msg.encode(buf),
            Self::CloseComplete(msg) => msg.encode(buf),
            Self::ParameterDescription(msg) => msg.encode(buf),
            Self::NoData(msg) => msg.encode(buf),
            Self::PortalSuspended(msg) => msg.encode(buf),
            Self::CommandComplete(msg) => msg.encode(buf),
            Self::EmptyQueryResponse(msg) => msg.encode(buf),
            Self::ReadyForQuery(msg) => msg.encode(buf),
            Self::ErrorResponse(msg) => msg.encode(buf),
            Self::NoticeResponse(msg) => msg.encode(buf),
            Self::NotificationResponse(msg) => msg.encode(buf),
            Self::RowDescription(msg) => msg.encode(buf),
            Self::DataRow(msg) => msg.encode(buf),
            Self::CopyData(msg) => msg.encode(buf),
            Self::CopyDone(msg) => msg.encode(buf),
            Self::CopyInResponse(msg) => msg.encode(buf),
            Self::CopyOutResponse(msg) => msg.encode(buf),
        }
    }

    pub fn decode(buf: &mut BytesMut) -> GaussWireResult<Option<Self>> {
        if buf.remaining() < 1 {
            return Ok(None);
        }

        match buf[0] {
            startup::MESSAGE_TYPE_BYTE_AUTHENTICATION => {
                startup::Authentication::decode(buf).map(|v| v.map(Self::Authentication))
            }
            startup::MESSAGE_TYPE_BYTE_PARAMETER_STATUS => {
                startup::ParameterStatus::decode(buf).map(|v| v.map(Self::ParameterStatus))
            }
            startup::MESSAGE_TYPE_BYTE_BACKEND_KEY => {
                startup::BackendKeyData::decode(buf).map(|v| v.map(Self::BackendKeyData))
            }

            extendedquery::MESSAGE_TYPE_BYTE_PARSE_COMPLETE => {
                extendedquery::ParseComplete::decode(buf).map(|v| v.map(Self::ParseComplete))
            }
            extendedquery::MESSAGE_TYPE_BYTE_BIND_COMPLETE => {
                extendedquery::BindComplete::decode(buf).map(|v| v.map(Self::BindComplete))
            }
            extendedquery::MESSAGE_TYPE_BYTE_CLOSE_COMPLETE => {
                extendedquery::CloseComplete::decode(buf).map(|v| v.map(Self::CloseComplete))
            }
            extendedquery::MESSAGE_TYPE_BYTE_PARAMETER_DESCRITION => {
                extendedquery::ParameterDescription::decode(buf)
                    .map(|v| v.map(Self::ParameterDescription))
            }
            extendedquery::MESSAGE_TYPE_BYTE_NO_DATA => {
                extendedquery::NoData::decode(buf).map(|v| v.map(Self::NoData))
            }
            extendedquery::MESSAGE_TYPE_BYTE_PORTAL_SUSPENDED => {
                extendedquery::PortalSuspended::decode(buf).map(|v| v.map(Self::PortalSuspended))
            }

            response::MESSAGE_TYPE_BYTE_COMMAND_COMPLETE => {
                response::CommandComplete::decode(buf).map(|v| v.map(Self::CommandComplete))
            }
            response::MESSAGE_TYPE_BYTE_EMPTY_QUERY_RESPONSE => {
                response::EmptyQueryResponse::decode(buf)
                    .map(|v| v.map(Self::EmptyQueryResponse))
            }
            response::MESSAGE_TYPE_BYTE_READY_FOR_QUERY => {
                response::ReadyForQuery::decode(buf).map(|v| v.map(Self::ReadyForQuery))
            }
            response::MESSAGE_TYPE_BYTE_ERROR_RESPONSE => {
                response::ErrorResponse::decode(buf).map(|v| v.map(Self::ErrorResponse))
            }
            response::MESSAGE_TYPE_BYTE_NOTICE_RESPONSE => {
                response::NoticeResponse::decode(buf).map(|v| v.map(Self::NoticeResponse))
            }
            response::MESSAGE_TYPE_BYTE_NOTIFICATION_RESPONSE => {
                response::NotificationResponse::decode(buf)
                    .map(|v| v.map(Self::NotificationResponse))
            }

            data::MESSAGE_TYPE_BYTE_ROW_DESCRITION => {
                data::RowDescription::decode(buf).map(|v| v.map(Self::RowDescription))
            }
            data::MESSAGE_TYPE_BYTE_DATA_ROW => {
                data::DataRow::decode(buf).map(|v| v.map(Self::DataRow))
            }

            copy::MESSAGE_TYPE_BYTE_COPY_DATA => {
                copy::CopyData::decode(buf).map(|v| v.map(Self::CopyData))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_DONE => {
                copy::CopyDone::decode(buf).map(|v| v.map(Self::CopyDone))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_IN_RESPONSE => {
                copy::CopyInResponse::decode(buf).map(|v| v.map(Self::CopyInResponse))
            }
            copy::MESSAGE_TYPE_BYTE_COPY_OUT_RESPONSE => {
                copy::CopyOutResponse::decode(buf).map(|v| v.map(Self::CopyOutResponse))
            }
            t => Err(GaussWireError::InvalidMessageType(t)),
        }
    }

    /// The type byte of this message, used in diagnostics.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Authentication(_) => startup::MESSAGE_TYPE_BYTE_AUTHENTICATION,
            Self::ParameterStatus(_) => startup::MESSAGE_TYPE_BYTE_PARAMETER_STATUS,
            Self::BackendKeyData(_) => startup::MESSAGE_TYPE_BYTE_BACKEND_KEY,
            Self::ParseComplete(_) => extendedquery::MESSAGE_TYPE_BYTE_PARSE_COMPLETE,
            Self::BindComplete(_) => extendedquery::MESSAGE_TYPE_BYTE_BIND_COMPLETE,
            Self::CloseComplete(_) => extendedquery::MESSAGE_TYPE_BYTE_CLOSE_COMPLETE,
            Self::ParameterDescription(_) => extendedquery::MESSAGE_TYPE_BYTE_PARAMETER_DESCRITION,
            Self::NoData(_) => extendedquery::MESSAGE_TYPE_BYTE_NO_DATA,
            Self::PortalSuspended(_) => extendedquery::MESSAGE_TYPE_BYTE_PORTAL_SUSPENDED,
            Self::CommandComplete(_) => response::MESSAGE_TYPE_BYTE_COMMAND_COMPLETE,
            Self::EmptyQueryResponse(_) => response::MESSAGE_TYPE_BYTE_EMPTY_QUERY_RESPONSE,
            Self::ReadyForQuery(_) => response::MESSAGE_TYPE_BYTE_READY_FOR_QUERY,
            Self::ErrorResponse(_) => response::MESSAGE_TYPE_BYTE_ERROR_RESPONSE,
            Self::NoticeResponse(_) => response::MESSAGE_TYPE_BYTE_NOTICE_RESPONSE,
            Self::NotificationResponse(_) => response::MESSAGE_TYPE_BYTE_NOTIFICATION_RESPONSE,
            Self::RowDescription(_) => data::MESSAGE_TYPE_BYTE_ROW_DESCRITION,
            Self::DataRow(_) => data::MESSAGE_TYPE_BYTE_DATA_ROW,
            Self::CopyData(_) => copy::MESSAGE_TYPE_BYTE_COPY_DATA,
            Self::CopyDone(_) => copy::MESSAGE_TYPE_BYTE_COPY_DONE,
            Self::CopyInResponse(_) => copy::MESSAGE_TYPE_BYTE_COPY_IN_RESPONSE,
            Self::CopyOutResponse(_) => copy::MESSAGE_TYPE_BYTE_COPY_OUT_RESPONSE,
        }
    }
}
