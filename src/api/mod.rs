//! Configuration, authentication and result APIs of the client.

pub use postgres_types::Type;

pub mod client;
pub mod results;
