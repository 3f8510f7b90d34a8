use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Message;
use super::codec;
use crate::error::{GaussWireError, GaussWireResult};

/// openGauss startup message.
///
/// The server speaks protocol 3.51, a superset of the 3.0 postgres protocol
/// with its own authentication and batch bind messages.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Startup {
    #[new(value = "3")]
    pub protocol_number_major: u16,
    #[new(value = "51")]
    pub protocol_number_minor: u16,
    #[new(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Default for Startup {
    fn default() -> Startup {
        Startup::new()
    }
}

impl Startup {
    const MINIMUM_STARTUP_MESSAGE_LEN: usize = 8;

    /// 3.51 as sent by this crate, 3.0 as sent by plain postgres clients.
    fn is_protocol_version_supported(version: i32) -> bool {
        version == 196659 || version == 196608
    }
}

impl Message for Startup {
    fn message_length(&self) -> usize {
        let param_length = self
            .parameters
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>();
        // length:4 + protocol_number:4 + param.len + nullbyte:1
        9 + param_length
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        // version number
        buf.put_u16(self.protocol_number_major);
        buf.put_u16(self.protocol_number_minor);

        // parameters
        for (k, v) in self.parameters.iter() {
            codec::put_cstring(buf, k);
            codec::put_cstring(buf, v);
        }
        // ends with empty cstring, a \0
        codec::put_cstring(buf, "");

        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> GaussWireResult<Option<Self>> {
        // packet len + protocol version
        // check if packet is valid
        if buf.remaining() >= Self::MINIMUM_STARTUP_MESSAGE_LEN {
            let packet_version = (&buf[4..8]).get_i32();
            if !Self::is_protocol_version_supported(packet_version) {
                return Err(GaussWireError::InvalidProtocolVersion(packet_version));
            }
        }

        codec::decode_packet(buf, 0, Self::decode_body)
    }

    fn decode_body(buf: &mut BytesMut, msg_len: usize) -> GaussWireResult<Self> {
        if msg_len <= Self::MINIMUM_STARTUP_MESSAGE_LEN {
            return Err(GaussWireError::InvalidStartupMessage);
        }

        let protocol_number_major = buf.get_u16();
        let protocol_number_minor = buf.get_u16();

        // end by reading the last \0
        let mut parameters = BTreeMap::new();
        while let Some(key) = codec::get_cstring(buf)? {
            let value = codec::get_cstring_or_empty(buf)?;
            parameters.insert(key, value);
        }

        Ok(Startup {
            protocol_number_major,
            protocol_number_minor,
            parameters,
        })
    }
}

/// Body of authentication request 10.
///
/// The server tells how the password is stored in its catalog, and the
/// client answers accordingly.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Sha256Challenge {
    /// Stored as plain or sha256 (methods 0 and 2): RFC5802 style
    /// challenge.
    Rfc5802 {
        random64code: String,
        token: String,
        iteration: i32,
    },
    /// Stored as md5 (method 1), carries the 4 byte md5 salt.
    Md5([u8; 4]),
    /// Any other stored method.
    Unsupported(i32),
}

impl Sha256Challenge {
    pub const STORED_METHOD_PLAIN: i32 = 0;
    pub const STORED_METHOD_MD5: i32 = 1;
    pub const STORED_METHOD_SHA256: i32 = 2;
}

/// authentication request family, sent by backend
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Authentication {
    Ok,                      // code 0
    KerberosV5,              // code 2
    CleartextPassword,       // code 3
    MD5Password([u8; 4]),    // code 5, with 4 bytes of md5 salt
    Gss,                     // code 7
    GssContinue(Bytes),      // code 8
    Sha256(Sha256Challenge), // code 10
    Md5Sha256 {
        // code 11
        random64code: String,
        salt: [u8; 4],
    },
}

pub const MESSAGE_TYPE_BYTE_AUTHENTICATION: u8 = b'R';

pub const AUTH_REQ_OK: i32 = 0;
pub const AUTH_REQ_KRB5: i32 = 2;
pub const AUTH_REQ_PASSWORD: i32 = 3;
pub const AUTH_REQ_MD5: i32 = 5;
pub const AUTH_REQ_GSS: i32 = 7;
pub const AUTH_REQ_GSS_CONT: i32 = 8;
pub const AUTH_REQ_SHA256: i32 = 10;
pub const AUTH_REQ_MD5_SHA256: i32 = 11;

const RANDOM64CODE_LEN: usize = 64;
const TOKEN_LEN: usize = 8;

fn get_ascii(buf: &mut BytesMut, len: usize) -> GaussWireResult<String> {
    codec::ensure_remaining(buf, len, "authentication")?;
    let bytes = buf.split_to(len);
    std::str::from_utf8(&bytes)
        .map(ToOwned::to_owned)
        .map_err(GaussWireError::InvalidUtf8)
}

fn get_salt(buf: &mut BytesMut) -> GaussWireResult<[u8; 4]> {
    codec::ensure_remaining(buf, 4, "authentication")?;
    let mut salt = [0; 4];
    buf.copy_to_slice(&mut salt);
    Ok(salt)
}

impl Authentication {
    pub fn code(&self) -> i32 {
        match self {
            Authentication::Ok => AUTH_REQ_OK,
            Authentication::KerberosV5 => AUTH_REQ_KRB5,
            Authentication::CleartextPassword => AUTH_REQ_PASSWORD,
            Authentication::MD5Password(_) => AUTH_REQ_MD5,
            Authentication::Gss => AUTH_REQ_GSS,
            Authentication::GssContinue(_) => AUTH_REQ_GSS_CONT,
            Authentication::Sha256(_) => AUTH_REQ_SHA256,
            Authentication::Md5Sha256 { .. } => AUTH_REQ_MD5_SHA256,
        }
    }
}

impl Message for Authentication {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_AUTHENTICATION)
    }

    #[inline]
    fn message_length(&self) -> usize {
        match self {
            Authentication::Ok
            | Authentication::CleartextPassword
            | Authentication::KerberosV5
            | Authentication::Gss => 8,
            Authentication::MD5Password(_) => 12,
            Authentication::GssContinue(data) => 8 + data.len(),
            Authentication::Sha256(challenge) => match challenge {
                Sha256Challenge::Rfc5802 {
                    random64code,
                    token,
                    ..
                } => 16 + random64code.len() + token.len(),
                Sha256Challenge::Md5(_) => 16,
                Sha256Challenge::Unsupported(_) => 12,
            },
            Authentication::Md5Sha256 { random64code, .. } => 12 + random64code.len(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i32(self.code());
        match self {
            Authentication::MD5Password(salt) => buf.put_slice(salt),
            Authentication::GssContinue(data) => buf.put_slice(data),
            Authentication::Sha256(challenge) => match challenge {
                Sha256Challenge::Rfc5802 {
                    random64code,
                    token,
                    iteration,
                } => {
                    buf.put_i32(Sha256Challenge::STORED_METHOD_SHA256);
                    buf.put_slice(random64code.as_bytes());
                    buf.put_slice(token.as_bytes());
                    buf.put_i32(*iteration);
                }
                Sha256Challenge::Md5(salt) => {
                    buf.put_i32(Sha256Challenge::STORED_METHOD_MD5);
                    buf.put_slice(salt);
                }
                Sha256Challenge::Unsupported(method) => buf.put_i32(*method),
            },
            Authentication::Md5Sha256 { random64code, salt } => {
                buf.put_slice(random64code.as_bytes());
                buf.put_slice(salt);
            }
            _ => {}
        }
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, msg_len: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 4, "authentication")?;
        let code = buf.get_i32();
        let msg = match code {
            AUTH_REQ_OK => Authentication::Ok,
            AUTH_REQ_KRB5 => Authentication::KerberosV5,
            AUTH_REQ_PASSWORD => Authentication::CleartextPassword,
            AUTH_REQ_MD5 => Authentication::MD5Password(get_salt(buf)?),
            AUTH_REQ_GSS => Authentication::Gss,
            AUTH_REQ_GSS_CONT => Authentication::GssContinue(buf.split_to(msg_len - 8).freeze()),
            AUTH_REQ_SHA256 => {
                codec::ensure_remaining(buf, 4, "authentication")?;
                let method = buf.get_i32();
                let challenge = match method {
                    Sha256Challenge::STORED_METHOD_PLAIN | Sha256Challenge::STORED_METHOD_SHA256 => {
                        let random64code = get_ascii(buf, RANDOM64CODE_LEN)?;
                        let token = get_ascii(buf, TOKEN_LEN)?;
                        codec::ensure_remaining(buf, 4, "authentication")?;
                        let iteration = buf.get_i32();
                        Sha256Challenge::Rfc5802 {
                            random64code,
                            token,
                            iteration,
                        }
                    }
                    Sha256Challenge::STORED_METHOD_MD5 => Sha256Challenge::Md5(get_salt(buf)?),
                    other => Sha256Challenge::Unsupported(other),
                };
                Authentication::Sha256(challenge)
            }
            AUTH_REQ_MD5_SHA256 => {
                let random64code = get_ascii(buf, RANDOM64CODE_LEN)?;
                let salt = get_salt(buf)?;
                Authentication::Md5Sha256 { random64code, salt }
            }
            _ => {
                return Err(GaussWireError::InvalidAuthenticationMessageCode(code));
            }
        };

        Ok(msg)
    }
}

pub const MESSAGE_TYPE_BYTE_PASSWORD: u8 = b'p';

/// Password packet sent from frontend, carrying the clear text password or
/// one of the digests.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct Password {
    pub password: String,
}

impl Message for Password {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_PASSWORD)
    }

    fn message_length(&self) -> usize {
        5 + self.password.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_cstring(buf, &self.password);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let pass = codec::get_cstring_or_empty(buf)?;

        Ok(Password::new(pass))
    }
}

/// parameter ack sent from backend after authentication success
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

pub const MESSAGE_TYPE_BYTE_PARAMETER_STATUS: u8 = b'S';

impl Message for ParameterStatus {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_PARAMETER_STATUS)
    }

    fn message_length(&self) -> usize {
        4 + 2 + self.name.len() + self.value.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        codec::put_cstring(buf, &self.name);
        codec::put_cstring(buf, &self.value);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        let name = codec::get_cstring_or_empty(buf)?;
        let value = codec::get_cstring_or_empty(buf)?;

        Ok(ParameterStatus { name, value })
    }
}

/// `BackendKeyData` message, sent from backend to frontend for issuing
/// `CancelRequest`
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct BackendKeyData {
    pub pid: i32,
    pub secret_key: i32,
}

pub const MESSAGE_TYPE_BYTE_BACKEND_KEY: u8 = b'K';

impl Message for BackendKeyData {
    #[inline]
    fn message_type() -> Option<u8> {
        Some(MESSAGE_TYPE_BYTE_BACKEND_KEY)
    }

    #[inline]
    fn message_length(&self) -> usize {
        12
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i32(self.pid);
        buf.put_i32(self.secret_key);

        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, _: usize) -> GaussWireResult<Self> {
        codec::ensure_remaining(buf, 8, "BackendKeyData")?;
        let pid = buf.get_i32();
        let secret_key = buf.get_i32();

        Ok(BackendKeyData { pid, secret_key })
    }
}

/// `SslRequest` sent from frontend before startup when TLS is wanted.
///
/// The server answers with a single unframed byte, `S` to proceed with the
/// TLS handshake or `N` to continue in plain text.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, new)]
pub struct SslRequest;

impl SslRequest {
    pub const BODY_MAGIC_NUMBER: i32 = 80877103;
    pub const BODY_SIZE: usize = 8;
}

impl Message for SslRequest {
    #[inline]
    fn message_type() -> Option<u8> {
        None
    }

    #[inline]
    fn message_length(&self) -> usize {
        Self::BODY_SIZE
    }

    fn encode_body(&self, buf: &mut BytesMut) -> GaussWireResult<()> {
        buf.put_i32(Self::BODY_MAGIC_NUMBER);
        Ok(())
    }

    fn decode_body(buf: &mut BytesMut, full_len: usize) -> GaussWireResult<Self> {
        if full_len == Self::BODY_SIZE && buf.get_i32() == Self::BODY_MAGIC_NUMBER {
            Ok(SslRequest)
        } else {
            Err(GaussWireError::InvalidStartupMessage)
        }
    }
}

pub const SSL_RESPONSE_ACCEPT: u8 = b'S';
pub const SSL_RESPONSE_REFUSE: u8 = b'N';
