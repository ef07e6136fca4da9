//! # Single-producer broadcast ring for typed byte messages
//!
//! A lock-free **single-producer / many-consumer** broadcast channel carrying
//! discrete, variable-length, type-tagged messages through a shared byte
//! region. One [`Transmitter`] fans messages out to any number of independent
//! [`Receiver`]s — threads or whole processes — none of which can block or
//! back-pressure the producer. A receiver that falls behind is simply lapped;
//! it detects the overrun itself and resynchronises to the newest message.
//!
//! # Features
//!
//! * **Wait-free transmit**: no locks, no CAS loops, no syscalls, no
//!   allocation on the message path
//! * **Typed, variable-length records** with an 8-byte header and 8-byte
//!   alignment
//! * **Tear detection** via a tail-intent/latest/tail counter triad; lapped
//!   receivers resynchronise instead of reading torn data
//! * Works **between threads** ([`local_channel`]) or **between processes**
//!   over POSIX shared memory ([`channel`])
//! * Independent receivers: clonable, each with its own cursor and overrun
//!   tally
//!
//! # Quick Example
//!
//! ```
//! use broadcast_channel::local_channel;
//!
//! # fn main() -> broadcast_channel::Result<()> {
//! let (tx, mut rx) = local_channel(1024)?;
//!
//! tx.transmit(1, b"hello", 0, 5)?;
//!
//! let (msg_type_id, payload) = rx.try_recv().expect("message pending");
//! assert_eq!(msg_type_id, 1);
//! assert_eq!(payload, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Design Overview
//!
//! The region is a power-of-two data area followed by a fixed trailer of
//! three `i64` counters, each on its own cache line:
//!
//! ```text
//! +-------------------------- data area (capacity bytes) ---------------------------+
//! | [len|type|payload..pad] [len|type|payload..pad] ... [len|-1 padding to wrap]    |
//! +------------------------------ trailer (192 bytes) ------------------------------+
//! | TAIL_INTENT (+0)          TAIL (+64)          LATEST (+128)                     |
//! +---------------------------------------------------------------------------------+
//! ```
//!
//! Every transmit follows one commit protocol:
//!
//! 1. Release-store `TAIL_INTENT` to where the write *will* end (including a
//!    padding record when the message must wrap), then a release fence
//! 2. Plainly write the record header and payload (and the padding record,
//!    when wrapping)
//! 3. Release-store `LATEST` (start of the new record), then `TAIL` (its
//!    aligned end) — the commit point receivers acquire
//!
//! Because the intent is published *before* any data byte and the tail
//! *after* all of them, a receiver can read a batch of records and then prove
//! the bytes were still intact: it re-reads `TAIL_INTENT` and checks the
//! producer's declared progress has not come within one capacity of its
//! cursor. On failure it discards the batch, jumps to `LATEST`, and counts
//! the lap.
//!
//! Messages are never split across the wrap boundary; a padding record
//! (`type = -1`) fills the tail of the data area instead, invisible to
//! receivers.
//!
//! # Spin-Wait Behavior
//!
//! [`Receiver::recv`] busy-waits for the next commit and consumes a logical
//! core while doing so; [`Receiver::try_recv`] is the polling variant. There
//! is no OS blocking anywhere, by design: the channel targets trading
//! systems, telemetry fan-out, and other latency-critical broadcast paths.
//!
//! # Single-Producer Invariant
//!
//! Exactly one transmitter may exist per region across **all** threads and
//! processes. Within a process this is enforced by the type system (the
//! transmitter is neither `Clone` nor `Sync`); across processes it cannot
//! be, and constructing a second transmitter over the same segment is
//! undefined behavior.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod broadcast;
mod error;
pub mod layout;
mod mmap;
mod stats;
pub mod view;

pub use broadcast::{
    HeapRegion, Receiver, Region, ShmRegion, Transmitter, channel, local_channel,
};
pub use error::{Error, Result};
pub use stats::{Samples, mono_time_ns};
