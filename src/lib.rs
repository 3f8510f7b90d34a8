//! gausswire is an async client driver for openGauss / GaussDB clusters.
//!
//! The crate is split into three layers:
//!
//! * [`messages`] implements the byte-level frontend and backend messages of
//!   the wire protocol, including the openGauss specific batch bind and
//!   authentication variants.
//! * [`api`] holds connection configuration, the authentication digests, the
//!   column-encryption hook interface and result types.
//! * [`tokio`] drives a connection over a tokio socket: startup, simple and
//!   extended queries, COPY FROM STDIN, and the multi-node [`Connector`]
//!   which balances connections across coordinator nodes.
//!
//! ```no_run
//! use gausswire::tokio::Connector;
//!
//! # async fn run() -> gausswire::error::GaussWireResult<()> {
//! let connector = Connector::from_conn_str(
//!     "host=cn1,cn2 port=8000 user=omm password=secret dbname=postgres autoBalance=roundrobin",
//! )?;
//! let mut conn = connector.connect().await?;
//! let result = conn.execute("create table t (id int)", &[]).await?;
//! println!("{:?}", result.tag());
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(any(feature = "_ring", feature = "_aws-lc-rs")))]
compile_error!("one of the features `client-api-ring` or `client-api-aws-lc-rs` must be enabled");

#[macro_use]
extern crate derive_new;

pub mod api;
pub mod error;
pub mod messages;
pub mod tokio;
pub mod types;

pub use crate::tokio::Connector;
