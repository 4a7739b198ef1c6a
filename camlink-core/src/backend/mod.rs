//! Capture backends.
//!
//! Only the synthetic test-pattern camera ships in-tree; platform camera
//! stacks plug in by implementing [`CaptureBackend`](crate::device::CaptureBackend).

pub mod synthetic;

pub use synthetic::{SyntheticBackend, SyntheticConfig, SyntheticFaults, render_test_pattern};
