//! Connections over tokio sockets and the multi-node [`Connector`].
pub mod client;
pub mod dialer;

pub use client::{
    CancelToken, ClientSocket, Connection, CopyIn, NoticeHandler, NotificationHandler, RowStream,
    Statement,
};
pub use dialer::{Connector, PgxcNodeSource, TopologySource};

pub use tokio_rustls;
pub type TlsConnector = tokio_rustls::TlsConnector;
