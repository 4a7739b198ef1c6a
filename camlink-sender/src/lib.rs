//! # camlink-sender
//!
//! Service that captures both cameras and ships them to a collector.
//!
//! ## Modes
//!
//! - **stream**: both devices stream length-prefixed JPEG frames over one
//!   persistent connection each.
//! - **photo**: single photos, alternating devices, one connection per photo.
//! - **clip**: fixed-length recordings, alternating devices, one connection
//!   per clip.

pub mod config;
pub mod service;
