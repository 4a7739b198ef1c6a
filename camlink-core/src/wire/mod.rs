//! Wire formats spoken with the collector.
//!
//! - [`frame`]: length-prefixed streaming frames (`u32` BE length + payload).
//! - [`transfer`]: one-file-per-connection transfers, headed by a
//!   modified-UTF-8 filename and optionally a `u64` BE size.

pub mod frame;
pub mod transfer;

pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, LENGTH_PREFIX_SIZE, length_prefix};
pub use transfer::{
    TRANSFER_CHUNK_SIZE, TransferHeader, TransferVariant, decode_modified_utf8,
    encode_filename, encode_header, encode_modified_utf8, read_header, receive_body,
    sanitize_filename,
};
