pub mod auth;
pub mod config;
pub mod hook;
pub mod query;
pub mod result;

pub use config::{
    BalancePolicy, ClientEncryption, Config, DistConfig, Host, SslConfig, SslMode,
    TargetSessionAttrs,
};
pub use hook::{ClientLogicFactory, ClientLogicHook, Handle, HandleTable};
pub use query::{ExecResult, Response, rewrite_placeholders};
pub use result::Row;

pub use crate::messages::response::TransactionStatus;

/// Indicate the result of current request
#[derive(Debug)]
pub enum ReadyState<D> {
    Pending,
    Ready(D),
}
