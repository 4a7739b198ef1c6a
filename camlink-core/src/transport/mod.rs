//! Outbound TCP transport to the collector.

pub mod connection;
pub mod endpoint;

pub use connection::Connection;
pub use endpoint::Endpoint;
