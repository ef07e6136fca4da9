//! On-wire record layout and the fixed trailer that carries the ring counters.
//!
//! The shared region is split into a power-of-two **data area** of `capacity`
//! bytes followed by a fixed-size **trailer**:
//!
//! ```text
//! byte 0 .. capacity-1          data area (records, positions masked by capacity-1)
//! byte capacity ..              trailer
//!   trailer + 0     i64  TAIL_INTENT   end position the next record will reach
//!   trailer + 64    i64  TAIL          committed end of the last written record
//!   trailer + 128   i64  LATEST        start position of the latest user record
//! ```
//!
//! Each record in the data area is laid out as:
//!
//! ```text
//! offset 0   i32  length     header + payload, unaligned
//! offset 4   i32  type       >= 1 user-defined, -1 = padding
//! offset 8   ..   payload
//! ```
//!
//! Records always start at a multiple of [`RECORD_ALIGNMENT`] within the data
//! area and never straddle the wrap boundary; the transmitter fills the tail
//! of the data area with a padding record instead.

use crate::error::{Error, Result};

/// Length in bytes of the record header: `length` and `type`, both `i32`.
pub const HEADER_LENGTH: usize = 8;

/// Records start at multiples of this alignment within the data area.
pub const RECORD_ALIGNMENT: usize = 8;

/// Reserved message type id of a padding record.
///
/// Padding records fill the unused bytes at the end of the data area so that
/// no user record straddles the wrap boundary. They are written only by the
/// transmitter and are never surfaced to receivers.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

/// Smallest admissible data-area capacity in bytes.
pub const MIN_CAPACITY: usize = 64;

/// Cache-line length assumed for counter placement.
pub const CACHE_LINE_LENGTH: usize = 64;

/// Trailer offset of the tail-intent counter.
pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;

/// Trailer offset of the tail counter.
pub const TAIL_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH;

/// Trailer offset of the latest-record counter.
pub const LATEST_COUNTER_OFFSET: usize = 2 * CACHE_LINE_LENGTH;

/// Total trailer length appended after the data area.
///
/// Keeps the three counters on distinct cache lines. These offsets are part
/// of the cross-process contract and must match on every attacher.
pub const TRAILER_LENGTH: usize = 3 * CACHE_LINE_LENGTH;

/// Offset of the `length` header field of the record at `record_offset`.
#[inline(always)]
pub const fn length_offset(record_offset: usize) -> usize {
    record_offset
}

/// Offset of the `type` header field of the record at `record_offset`.
#[inline(always)]
pub const fn type_offset(record_offset: usize) -> usize {
    record_offset + 4
}

/// Offset of the first payload byte of the record at `record_offset`.
#[inline(always)]
pub const fn msg_offset(record_offset: usize) -> usize {
    record_offset + HEADER_LENGTH
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Maximum message (payload) length admitted by a data area of `capacity`.
#[inline(always)]
pub const fn calculate_max_message_length(capacity: usize) -> usize {
    capacity / 8
}

/// Validates a data-area capacity.
///
/// # Errors
///
/// Returns [`Error::InvalidCapacity`] unless `capacity` is a power of two of
/// at least [`MIN_CAPACITY`] bytes.
pub fn check_capacity(capacity: usize) -> Result<()> {
    if capacity < MIN_CAPACITY || !capacity.is_power_of_two() {
        return Err(Error::InvalidCapacity { capacity });
    }
    Ok(())
}

/// Validates a user-supplied message type id.
///
/// User messages carry ids `>= 1`. Everything below that is reserved; in
/// particular [`PADDING_MSG_TYPE_ID`] is written only by the transmitter
/// itself, which bypasses this check.
///
/// # Errors
///
/// Returns [`Error::InvalidMsgTypeId`] when `msg_type_id < 1`.
pub fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
    if msg_type_id < 1 {
        return Err(Error::InvalidMsgTypeId { msg_type_id });
    }
    Ok(())
}
