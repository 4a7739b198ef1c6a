//! # camlink-collector
//!
//! Receiving end for camlink senders. Listens on one port per camera and
//! stores what arrives:
//!
//! - **stream** listeners decode length-prefixed frames and write each one
//!   as a timestamped JPEG, logging throughput once a second;
//! - **photo** / **clip** listeners accept one file per connection and
//!   commit it only once it is complete.

pub mod config;
pub mod server;
pub mod storage;
