//! Error types for the broadcast channel.

use crate::layout::MIN_CAPACITY;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The region's data area is not a power of two, or is too small to hold
    /// a single aligned record.
    #[error("capacity must be a power of two of at least {min} bytes, got {capacity}", min = MIN_CAPACITY)]
    InvalidCapacity { capacity: usize },

    /// A message type id outside the user range (`>= 1`) was supplied.
    #[error("message type id must be >= 1, got {msg_type_id}")]
    InvalidMsgTypeId { msg_type_id: i32 },

    /// The message exceeds the ring's per-message limit of `capacity / 8`.
    #[error("message length {length} exceeds the maximum of {max_msg_length}")]
    MessageTooLong { length: usize, max_msg_length: usize },

    /// The requested range does not lie within the source slice.
    #[error(
        "source range at offset {src_offset} with length {length} is out of bounds \
         for a slice of {src_len} bytes"
    )]
    SourceOutOfBounds {
        src_offset: usize,
        length: usize,
        src_len: usize,
    },

    /// An OS-level shared-memory operation failed.
    #[error("shared memory error: {0}")]
    SharedMemory(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
