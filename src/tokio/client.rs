//! Socket, codec and connection of a single client session.
use std::io::{Error as IOError, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use pin_project::pin_project;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::{Decoder, Encoder};

use super::TlsConnector;
use super::dialer::Candidate;
use crate::error::{GaussWireError, GaussWireResult};
use crate::messages::startup::{SSL_RESPONSE_ACCEPT, SSL_RESPONSE_REFUSE, SslRequest};
use crate::messages::{BackendMessage, FrontendMessage, Message};

pub(crate) mod connection;
mod copy;
mod statement;
pub mod tls;

pub use connection::{CancelToken, Connection, NoticeHandler, NotificationHandler};
pub use copy::CopyIn;
pub use statement::{RowStream, Statement};

#[non_exhaustive]
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = BackendMessage;
    type Error = GaussWireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        BackendMessage::decode(src)
    }
}

impl Encoder<FrontendMessage> for ClientCodec {
    type Error = GaussWireError;

    fn encode(&mut self, item: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

#[pin_project(project = ClientSocketProj)]
pub enum ClientSocket {
    Plain(#[pin] TcpStream),
    Secure(#[pin] Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(#[pin] UnixStream),
}

impl ClientSocket {
    pub fn is_secure(&self) -> bool {
        matches!(self, ClientSocket::Secure(_))
    }
}

impl AsyncRead for ClientSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.project() {
            ClientSocketProj::Plain(socket) => socket.poll_read(cx, buf),
            ClientSocketProj::Secure(tls_socket) => tls_socket.poll_read(cx, buf),
            #[cfg(unix)]
            ClientSocketProj::Unix(socket) => socket.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, IOError>> {
        match self.project() {
            ClientSocketProj::Plain(socket) => socket.poll_write(cx, buf),
            ClientSocketProj::Secure(tls_socket) => tls_socket.poll_write(cx, buf),
            #[cfg(unix)]
            ClientSocketProj::Unix(socket) => socket.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
        match self.project() {
            ClientSocketProj::Plain(socket) => socket.poll_flush(cx),
            ClientSocketProj::Secure(tls_socket) => tls_socket.poll_flush(cx),
            #[cfg(unix)]
            ClientSocketProj::Unix(socket) => socket.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
        match self.project() {
            ClientSocketProj::Plain(socket) => socket.poll_shutdown(cx),
            ClientSocketProj::Secure(tls_socket) => tls_socket.poll_shutdown(cx),
            #[cfg(unix)]
            ClientSocketProj::Unix(socket) => socket.poll_shutdown(cx),
        }
    }
}

/// Open the socket of one dial candidate, negotiating TLS when the
/// candidate asks for it.
pub(crate) async fn open_socket(
    candidate: &Candidate,
    tls_connector: Option<&TlsConnector>,
) -> GaussWireResult<ClientSocket> {
    let Some(addr) = candidate.addr else {
        return open_unix_socket(candidate).await;
    };

    let socket = TcpStream::connect(addr).await?;
    socket.set_nodelay(true)?;

    match (candidate.tls, tls_connector) {
        (false, _) => Ok(ClientSocket::Plain(socket)),
        (true, Some(tls_connector)) => {
            ssl_handshake(socket, &candidate.host.host, tls_connector).await
        }
        (true, None) => Err(GaussWireError::InvalidConfig(
            "sslmode requires TLS but no TLS configuration is available".to_owned(),
        )),
    }
}

#[cfg(unix)]
async fn open_unix_socket(candidate: &Candidate) -> GaussWireResult<ClientSocket> {
    let socket = UnixStream::connect(candidate.host.unix_socket_path()).await?;
    Ok(ClientSocket::Unix(socket))
}

#[cfg(not(unix))]
async fn open_unix_socket(candidate: &Candidate) -> GaussWireResult<ClientSocket> {
    Err(GaussWireError::IoError(IOError::new(
        ErrorKind::Unsupported,
        format!("unix sockets are not supported: {}", candidate.host),
    )))
}

/// Send `SslRequest` on a fresh socket and upgrade it when the server
/// accepts.
///
/// The answer is a single unframed byte so it is read from the raw stream,
/// before any framing is set up.
pub(crate) async fn ssl_handshake(
    mut socket: TcpStream,
    hostname: &str,
    tls_connector: &TlsConnector,
) -> GaussWireResult<ClientSocket> {
    let mut buf = BytesMut::with_capacity(SslRequest::BODY_SIZE);
    SslRequest::new().encode(&mut buf)?;
    socket.write_all(&buf).await?;
    socket.flush().await?;

    match socket.read_u8().await? {
        SSL_RESPONSE_ACCEPT => {
            let server_name = ServerName::try_from(hostname.to_owned())
                .map_err(|_| GaussWireError::InvalidServerName(hostname.to_owned()))?;
            let tls_stream = tls_connector.connect(server_name, socket).await?;
            Ok(ClientSocket::Secure(Box::new(tls_stream)))
        }
        SSL_RESPONSE_REFUSE => Err(GaussWireError::TlsRefused),
        other => Err(GaussWireError::IoError(IOError::new(
            ErrorKind::InvalidData,
            format!("unexpected response to SslRequest: {other}"),
        ))),
    }
}
