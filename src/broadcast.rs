//! Single-producer broadcast ring over a shared byte region.
//!
//! One [`Transmitter`] appends variable-length typed records to a
//! power-of-two data area and publishes its progress through three `i64`
//! counters in a trailer after the data area. Any number of [`Receiver`]s
//! poll the committed tail and read records without coordinating with the
//! transmitter or with each other. A receiver that falls more than one
//! capacity behind is *lapped*: it detects this through the tail-intent
//! counter, discards what it read, and resynchronises to the latest record.

use crate::error::{Error, Result};
use crate::layout::{
    CACHE_LINE_LENGTH, HEADER_LENGTH, LATEST_COUNTER_OFFSET, PADDING_MSG_TYPE_ID,
    RECORD_ALIGNMENT, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH, align_up,
    calculate_max_message_length, check_capacity, check_msg_type_id, length_offset, msg_offset,
    type_offset,
};
use crate::mmap::{map_shared_memory, unlink_shared_memory, unmap_shared_memory};
use crate::view::AtomicView;
use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

/// Creates an inter-process broadcast channel backed by a [`ShmRegion`].
///
/// This is the primary constructor for a channel shared between processes.
/// Both the [`Transmitter`] and the [`Receiver`] operate on the same POSIX
/// shared-memory segment; further receivers attach by calling this function
/// (or [`Receiver::new`] on a region mapped separately) with the same name
/// from any process.
///
/// # Capacity
///
/// `capacity` is the size in bytes of the data area and **must be a power of
/// two of at least 64 bytes**; the segment itself is `capacity` plus a fixed
/// trailer. Unlike slot-based rings there is no rounding here: the capacity
/// is part of the cross-process contract, so an inadmissible value is
/// rejected rather than silently adjusted.
///
/// # Shared Memory Name
///
/// `shm_name` must follow POSIX shared-memory naming rules: it **must start
/// with `'/'`** (e.g. `"/my-channel"`) and contain no other `'/'`. A name
/// that already exists attaches to the existing segment; its counters are
/// preserved, so the transmitter resumes from the tail a previous producer
/// left behind.
///
/// # Returns
///
/// A `(Transmitter, Receiver)` pair over the same segment. Both types are
/// `Send` but not `Sync`. The `Receiver` is clonable; the `Transmitter` is
/// **not**, preserving the single-producer invariant within this process —
/// across processes the invariant is the host's responsibility.
///
/// # Errors
///
/// - [`Error::InvalidCapacity`] for an inadmissible `capacity`
/// - [`Error::SharedMemory`] when the OS rejects the segment
pub fn channel(
    shm_name: impl AsRef<str>,
    capacity: usize,
) -> Result<(Transmitter<ShmRegion>, Receiver<ShmRegion>)> {
    let region = ShmRegion::create(shm_name.as_ref(), capacity)?;
    let transmitter = Transmitter::new(Arc::clone(&region))?;
    let receiver = Receiver::new(region)?;
    Ok((transmitter, receiver))
}

/// Creates an in-process broadcast channel backed by a [`HeapRegion`].
///
/// The non-shared-memory variant of [`channel`], for broadcasting between
/// threads of a single process. Capacity rules are identical.
///
/// # Errors
///
/// Returns [`Error::InvalidCapacity`] for an inadmissible `capacity`.
pub fn local_channel(
    capacity: usize,
) -> Result<(Transmitter<HeapRegion>, Receiver<HeapRegion>)> {
    let region = HeapRegion::new(capacity)?;
    let transmitter = Transmitter::new(Arc::clone(&region))?;
    let receiver = Receiver::new(region)?;
    Ok((transmitter, receiver))
}

/// Backing storage for a broadcast ring.
///
/// A region is `capacity + TRAILER_LENGTH` contiguous bytes: the data area
/// followed by the counter trailer. Implementors guarantee the base address
/// is at least 8-byte aligned (both provided regions are cache-line or page
/// aligned) and that the memory stays valid for the implementor's lifetime.
///
/// The ring takes no ownership of the region's contents: attaching to a
/// region with non-zero counters resumes the ring where it left off.
pub trait Region {
    /// Base address of the region.
    fn as_ptr(&self) -> NonNull<u8>;

    /// Total length in bytes: data area plus trailer.
    fn len(&self) -> usize;
}

/// A zeroed, cache-line-aligned heap allocation used as an in-process region.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocates a zeroed region for a data area of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] unless `capacity` is a power of
    /// two of at least 64 bytes.
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        check_capacity(capacity)?;
        let len = capacity + TRAILER_LENGTH;
        let layout = Layout::from_size_align(len, CACHE_LINE_LENGTH)
            .map_err(|_| Error::InvalidCapacity { capacity })?;

        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        Ok(Arc::new(Self { ptr, len, layout }))
    }
}

impl Region for HeapRegion {
    #[inline(always)]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A POSIX shared-memory mapping used as an inter-process region.
///
/// Dropping the last `Arc<ShmRegion>` unmaps the segment but does not remove
/// it: other processes keep their mappings and later attachers find the ring
/// where it was. Call [`ShmRegion::unlink`] to retire the name.
pub struct ShmRegion {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Maps (creating if absent) the named segment for a data area of
    /// `capacity` bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCapacity`] for an inadmissible `capacity`
    /// - [`Error::SharedMemory`] when `shm_open`/`ftruncate`/`mmap` fail
    pub fn create(name: &str, capacity: usize) -> Result<Arc<Self>> {
        check_capacity(capacity)?;
        let len = capacity + TRAILER_LENGTH;
        let ptr = map_shared_memory(name, len)?;
        Ok(Arc::new(Self { ptr, len }))
    }

    /// Removes the named segment. Existing mappings stay usable.
    pub fn unlink(name: &str) -> Result<()> {
        unlink_shared_memory(name)?;
        Ok(())
    }
}

impl Region for ShmRegion {
    #[inline(always)]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for ShmRegion {
    /// Unmaps the segment.
    ///
    /// # Panics
    ///
    /// Panics if unmapping fails; a half-torn-down mapping could corrupt
    /// other processes attached to the same ring.
    fn drop(&mut self) {
        unsafe {
            unmap_shared_memory(self.ptr, self.len).expect("ShmRegion::drop failed");
        }
    }
}

/// Cached geometry shared by the transmitter and receiver: capacity, mask,
/// message limit, and the absolute indices of the three trailer counters.
#[derive(Debug, Clone, Copy)]
struct RingLayout {
    capacity: usize,
    mask: i64,
    max_msg_length: usize,
    tail_intent_index: usize,
    tail_index: usize,
    latest_index: usize,
}

impl RingLayout {
    fn of(region_len: usize) -> Result<Self> {
        let capacity = region_len.saturating_sub(TRAILER_LENGTH);
        check_capacity(capacity)?;
        Ok(Self {
            capacity,
            mask: capacity as i64 - 1,
            max_msg_length: calculate_max_message_length(capacity),
            tail_intent_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_index: capacity + TAIL_COUNTER_OFFSET,
            latest_index: capacity + LATEST_COUNTER_OFFSET,
        })
    }
}

/// The single producer of a broadcast ring.
///
/// `transmit` is wait-free: it never blocks, loops, or observes receivers.
/// There is **no backpressure** — a receiver that cannot keep up is lapped
/// and loses messages, which it detects on its own side. The transmitter
/// performs no allocation and no syscall.
///
/// The transmitter is a *view* of the region, not its owner. Constructing it
/// does not reset the counters: attaching to a used region resumes from the
/// committed tail.
///
/// # Commit protocol
///
/// Each `transmit` publishes the three counters in a strict order:
///
/// 1. `TAIL_INTENT` (release, then a release fence) — where the write *will*
///    end, covering the padding record when the message wraps;
/// 2. the record header and payload, plain;
/// 3. `LATEST` (release) — the start position of the new record;
/// 4. `TAIL` (release) — the commit point receivers acquire.
///
/// Publishing the intent before touching the data area is what lets a lapped
/// receiver prove that bytes it just read may have been overwritten.
///
/// # Safety
///
/// Exactly one transmitter may exist per region at any time, across **all**
/// threads and processes. The type is not `Clone` and not `Sync`, which
/// enforces this within a process; across processes nothing can enforce it,
/// and constructing two transmitters against the same segment is undefined.
#[derive(Debug)]
pub struct Transmitter<R: Region> {
    view: AtomicView,
    layout: RingLayout,
    /// Keeps the mapping alive for as long as the transmitter exists.
    region: Arc<R>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<R: Region> Transmitter<R> {
    /// Constructs the producer side over an existing region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] unless the region is
    /// `capacity + TRAILER_LENGTH` bytes with `capacity` a power of two of
    /// at least 64.
    pub fn new(region: Arc<R>) -> Result<Self> {
        let layout = RingLayout::of(region.len())?;
        let view = unsafe { AtomicView::new(region.as_ptr(), region.len()) };
        Ok(Self {
            view,
            layout,
            region,
            _not_sync: PhantomData,
        })
    }

    /// Size in bytes of the data area.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Largest admissible message (payload) length: `capacity / 8`.
    #[inline(always)]
    pub fn max_msg_length(&self) -> usize {
        self.layout.max_msg_length
    }

    /// Appends one message to the ring and commits it.
    ///
    /// The message is `length` bytes of `src` starting at `src_offset`,
    /// tagged with `msg_type_id`. On success the record is fully written and
    /// committed: any receiver that observes the new tail also observes the
    /// complete header and payload.
    ///
    /// # Errors
    ///
    /// All validation happens before the region is touched; on error the
    /// ring is unchanged.
    ///
    /// - [`Error::InvalidMsgTypeId`] when `msg_type_id < 1`
    /// - [`Error::MessageTooLong`] when `length` exceeds
    ///   [`max_msg_length`](Self::max_msg_length)
    /// - [`Error::SourceOutOfBounds`] when `src_offset + length` overruns
    ///   `src`
    pub fn transmit(
        &self,
        msg_type_id: i32,
        src: &[u8],
        src_offset: usize,
        length: usize,
    ) -> Result<()> {
        check_msg_type_id(msg_type_id)?;
        self.check_message_length(length)?;
        match src_offset.checked_add(length) {
            Some(end) if end <= src.len() => {}
            _ => {
                return Err(Error::SourceOutOfBounds {
                    src_offset,
                    length,
                    src_len: src.len(),
                });
            }
        }

        let layout = &self.layout;
        // The producer owns TAIL; a plain read suffices.
        let mut current_tail = self.view.get_i64(layout.tail_index);
        let mut record_offset = (current_tail & layout.mask) as usize;
        let record_length = length + HEADER_LENGTH;
        let aligned_length = align_up(record_length, RECORD_ALIGNMENT);
        let new_tail = current_tail + aligned_length as i64;
        let to_end_of_buffer = layout.capacity - record_offset;

        if to_end_of_buffer < aligned_length {
            // The record would straddle the wrap: declare intent over both
            // the padding record and the real one, fill the tail of the data
            // area, and restart at offset zero.
            self.signal_tail_intent(new_tail + to_end_of_buffer as i64);
            self.insert_padding_record(record_offset, to_end_of_buffer);
            current_tail += to_end_of_buffer as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail);
        }

        self.view
            .put_i32(length_offset(record_offset), record_length as i32);
        self.view.put_i32(type_offset(record_offset), msg_type_id);
        self.view.put_bytes(
            msg_offset(record_offset),
            &src[src_offset..src_offset + length],
        );

        self.view.put_i64_release(layout.latest_index, current_tail);
        self.view
            .put_i64_release(layout.tail_index, current_tail + aligned_length as i64);

        Ok(())
    }

    #[inline(always)]
    fn check_message_length(&self, length: usize) -> Result<()> {
        if length > self.layout.max_msg_length {
            return Err(Error::MessageTooLong {
                length,
                max_msg_length: self.layout.max_msg_length,
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn signal_tail_intent(&self, new_tail: i64) {
        self.view
            .put_i64_release(self.layout.tail_intent_index, new_tail);
        // StoreStore: the intent must reach memory before any header byte.
        fence(Ordering::Release);
    }

    #[inline(always)]
    fn insert_padding_record(&self, record_offset: usize, length: usize) {
        self.view
            .put_i32(length_offset(record_offset), length as i32);
        self.view
            .put_i32(type_offset(record_offset), PADDING_MSG_TYPE_ID);
    }
}

/// An independent consumer of a broadcast ring.
///
/// Each receiver keeps its own cursor; receivers never write to the region
/// and never interact with each other or with the transmitter. Cloning a
/// receiver yields another independent consumer starting at the same cursor.
///
/// # Reading protocol
///
/// The primitive surface mirrors the commit protocol:
///
/// 1. [`receive_next`](Self::receive_next) positions the receiver on the
///    next committed record (skipping padding) and exposes it through
///    [`msg_type_id`](Self::msg_type_id), [`length`](Self::length) and
///    [`payload`](Self::payload);
/// 2. after consuming the payload the caller must call
///    [`validate`](Self::validate): `false` means the transmitter has lapped
///    this receiver and the bytes just read may be torn — discard them; the
///    next `receive_next` resynchronises to the latest record.
///
/// The safe wrappers [`try_recv`](Self::try_recv) and [`recv`](Self::recv)
/// run that loop internally, copying each payload into a receiver-owned
/// scratch buffer so the returned slice is stable regardless of what the
/// transmitter does next.
///
/// # Overrun accounting
///
/// Every resynchronisation increments [`lapped_count`](Self::lapped_count).
/// Messages between the old cursor and the latest record are lost; the ring
/// favours the producer, by contract.
#[derive(Debug)]
pub struct Receiver<R: Region> {
    view: AtomicView,
    layout: RingLayout,
    /// Position of the record currently exposed.
    cursor: i64,
    /// Position one past the aligned end of the current record.
    next_record: i64,
    /// In-buffer offset of the current record.
    record_offset: usize,
    lapped_count: u64,
    /// Copy-out target for the safe receive path; sized `max_msg_length`.
    scratch: Box<[u8]>,
    scratch_len: usize,
    region: Arc<R>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<R: Region> Receiver<R> {
    /// Attaches a receiver at the committed tail: only messages transmitted
    /// after this call are observed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] for a malformed region, exactly as
    /// [`Transmitter::new`].
    pub fn new(region: Arc<R>) -> Result<Self> {
        Self::attach(region, TAIL_COUNTER_OFFSET)
    }

    /// Attaches a receiver at the most recently committed record: a late
    /// joiner immediately observes the last message, then follows the tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] for a malformed region.
    pub fn new_from_latest(region: Arc<R>) -> Result<Self> {
        Self::attach(region, LATEST_COUNTER_OFFSET)
    }

    fn attach(region: Arc<R>, counter_offset: usize) -> Result<Self> {
        let layout = RingLayout::of(region.len())?;
        let view = unsafe { AtomicView::new(region.as_ptr(), region.len()) };
        let cursor = view.get_i64_acquire(layout.capacity + counter_offset);
        Ok(Self {
            view,
            layout,
            cursor,
            next_record: cursor,
            record_offset: (cursor & layout.mask) as usize,
            lapped_count: 0,
            scratch: vec![0u8; layout.max_msg_length].into_boxed_slice(),
            scratch_len: 0,
            region,
            _not_sync: PhantomData,
        })
    }

    /// Size in bytes of the data area.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Number of times this receiver has been lapped by the transmitter.
    #[inline(always)]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Advances to the next committed record, if any.
    ///
    /// Returns `false` when the receiver is caught up with the committed
    /// tail. On `true` the record is exposed through
    /// [`msg_type_id`](Self::msg_type_id), [`length`](Self::length) and
    /// [`payload`](Self::payload); the caller must finish with
    /// [`validate`](Self::validate) before trusting anything it read.
    ///
    /// A receiver that was already lapped before this call resynchronises
    /// here: the cursor jumps to the latest record and
    /// [`lapped_count`](Self::lapped_count) is incremented. Padding records
    /// are stepped over internally and never surfaced.
    pub fn receive_next(&mut self) -> bool {
        let layout = self.layout;
        let tail = self.view.get_i64_acquire(layout.tail_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor & layout.mask) as usize;
        if !self.validate_at(cursor) {
            self.lapped_count += 1;
            cursor = self.view.get_i64_acquire(layout.latest_index);
            record_offset = (cursor & layout.mask) as usize;
        }

        self.cursor = cursor;
        self.next_record = cursor.wrapping_add(self.aligned_record_length(record_offset));

        if self.view.get_i32(type_offset(record_offset)) == PADDING_MSG_TYPE_ID {
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record = self
                .next_record
                .wrapping_add(self.aligned_record_length(0));
        }

        self.record_offset = record_offset;
        true
    }

    /// Type id of the current record.
    #[inline(always)]
    pub fn msg_type_id(&self) -> i32 {
        self.view.get_i32(type_offset(self.record_offset))
    }

    /// Payload length of the current record.
    ///
    /// Clamped to the data area and the per-message limit, so a length read
    /// off a record being overwritten can never index out of bounds; such a
    /// read fails [`validate`](Self::validate) anyway.
    #[inline(always)]
    pub fn length(&self) -> usize {
        let raw = self.view.get_i32(length_offset(self.record_offset)) as i64 - HEADER_LENGTH as i64;
        let in_buffer = self.layout.capacity - msg_offset(self.record_offset);
        raw.clamp(0, self.layout.max_msg_length.min(in_buffer) as i64) as usize
    }

    /// Borrows the current record's payload directly from the ring.
    ///
    /// # Safety
    ///
    /// The transmitter may overwrite these bytes at any moment. The caller
    /// must drop the slice and call [`validate`](Self::validate) before
    /// relying on anything derived from it; on `false` all such work must be
    /// discarded. For a stable copy use [`try_recv`](Self::try_recv) or
    /// [`recv`](Self::recv) instead.
    #[inline(always)]
    pub unsafe fn payload(&self) -> &[u8] {
        unsafe { self.view.bytes_at(msg_offset(self.record_offset), self.length()) }
    }

    /// Confirms that the record exposed by the last
    /// [`receive_next`](Self::receive_next) was still intact while it was
    /// being read.
    ///
    /// Returns `false` when the transmitter's declared write intent has
    /// passed within one capacity of the cursor — the bytes may have been
    /// overwritten mid-read and must be discarded. The next `receive_next`
    /// resynchronises to the latest record.
    #[inline(always)]
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    #[inline(always)]
    fn validate_at(&self, cursor: i64) -> bool {
        cursor + self.layout.capacity as i64
            >= self.view.get_i64_acquire(self.layout.tail_intent_index)
    }

    /// Aligned total length of the record at `record_offset`.
    ///
    /// Wrapping arithmetic: a torn length read off a lapped record may be
    /// garbage, which `validate` rejects before it can do harm.
    #[inline(always)]
    fn aligned_record_length(&self, record_offset: usize) -> i64 {
        let length = self.view.get_i32(length_offset(record_offset)) as i64;
        length.wrapping_add(RECORD_ALIGNMENT as i64 - 1) & !(RECORD_ALIGNMENT as i64 - 1)
    }

    /// Copies the next committed record into the scratch buffer and
    /// validates it, retrying after a mid-copy lap. Returns its type id, or
    /// `None` when caught up.
    fn poll_into_scratch(&mut self) -> Option<i32> {
        loop {
            if !self.receive_next() {
                return None;
            }

            let msg_type_id = self.msg_type_id();
            let length = self.length();
            let offset = msg_offset(self.record_offset);
            let view = self.view;
            view.get_bytes(offset, &mut self.scratch[..length]);

            if self.validate() {
                self.scratch_len = length;
                return Some(msg_type_id);
            }
            // Lapped mid-copy; the next pass resynchronises to the latest
            // record.
        }
    }

    /// Non-blocking receive.
    ///
    /// Returns the next message as `(msg_type_id, payload)` with the payload
    /// copied into a receiver-owned buffer, or `None` when no message is
    /// pending. Overruns are handled internally: the receiver skips to the
    /// latest record and the loss shows up in
    /// [`lapped_count`](Self::lapped_count).
    #[inline(always)]
    pub fn try_recv(&mut self) -> Option<(i32, &[u8])> {
        let msg_type_id = self.poll_into_scratch()?;
        Some((msg_type_id, &self.scratch[..self.scratch_len]))
    }

    /// Blocking receive.
    ///
    /// Spin-waits until a message is committed, then behaves like
    /// [`try_recv`](Self::try_recv). Burns a CPU while waiting; intended for
    /// latency-critical consumers.
    pub fn recv(&mut self) -> (i32, &[u8]) {
        let msg_type_id = loop {
            if let Some(id) = self.poll_into_scratch() {
                break id;
            }
            core::hint::spin_loop();
        };
        (msg_type_id, &self.scratch[..self.scratch_len])
    }
}

impl<R: Region> Clone for Receiver<R> {
    fn clone(&self) -> Self {
        Self {
            view: self.view,
            layout: self.layout,
            cursor: self.cursor,
            next_record: self.next_record,
            record_offset: self.record_offset,
            lapped_count: self.lapped_count,
            scratch: vec![0u8; self.layout.max_msg_length].into_boxed_slice(),
            scratch_len: 0,
            region: Arc::clone(&self.region),
            _not_sync: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MIN_CAPACITY;

    const CAPACITY: usize = 1024;

    /// Arbitrary-length region for construction tests; 8-byte aligned via
    /// `u64` backing.
    struct RawRegion(Vec<u64>);

    impl RawRegion {
        fn for_capacity(capacity: usize) -> Arc<Self> {
            Arc::new(Self(vec![0; (capacity + TRAILER_LENGTH).div_ceil(8)]))
        }
    }

    impl Region for RawRegion {
        fn as_ptr(&self) -> NonNull<u8> {
            NonNull::new(self.0.as_ptr() as *mut u8).unwrap()
        }

        fn len(&self) -> usize {
            self.0.len() * 8
        }
    }

    fn region() -> Arc<HeapRegion> {
        HeapRegion::new(CAPACITY).unwrap()
    }

    fn view_of(region: &Arc<impl Region>) -> AtomicView {
        unsafe { AtomicView::new(region.as_ptr(), region.len()) }
    }

    /// Trailer counter values `(tail_intent, tail, latest)`.
    fn counters(view: &AtomicView, capacity: usize) -> (i64, i64, i64) {
        (
            view.get_i64(capacity + TAIL_INTENT_COUNTER_OFFSET),
            view.get_i64(capacity + TAIL_COUNTER_OFFSET),
            view.get_i64(capacity + LATEST_COUNTER_OFFSET),
        )
    }

    #[test]
    fn heap_region_rejects_invalid_capacity() {
        assert!(matches!(
            HeapRegion::new(1000),
            Err(Error::InvalidCapacity { capacity: 1000 })
        ));
        assert!(matches!(
            HeapRegion::new(MIN_CAPACITY / 2),
            Err(Error::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn transmitter_rejects_non_power_of_two_region() {
        for capacity in [0, 32, 100, 1000, 1023] {
            let region = RawRegion::for_capacity(capacity);
            assert!(
                matches!(Transmitter::new(region), Err(Error::InvalidCapacity { .. })),
                "capacity {capacity} must be rejected"
            );
        }

        let region = RawRegion::for_capacity(CAPACITY);
        assert!(Transmitter::new(region).is_ok());
    }

    #[test]
    fn accessors_report_geometry() {
        let tx = Transmitter::new(region()).unwrap();
        assert_eq!(tx.capacity(), CAPACITY);
        assert_eq!(tx.max_msg_length(), CAPACITY / 8);
    }

    #[test]
    fn transmit_writes_record_and_counters() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        let payload = [0xAA; 16];
        tx.transmit(7, &payload, 0, 16).unwrap();

        let (tail_intent, tail, latest) = counters(&view, CAPACITY);
        assert_eq!(tail_intent, 24);
        assert_eq!(tail, 24);
        assert_eq!(latest, 0);

        assert_eq!(view.get_i32(length_offset(0)), 24);
        assert_eq!(view.get_i32(type_offset(0)), 7);
        let mut bytes = [0u8; 16];
        view.get_bytes(msg_offset(0), &mut bytes);
        assert_eq!(bytes, payload);
    }

    #[test]
    fn transmit_appends_records_back_to_back() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        tx.transmit(1, &[0x11; 8], 0, 8).unwrap();
        tx.transmit(2, &[0x22; 8], 0, 8).unwrap();

        let (tail_intent, tail, latest) = counters(&view, CAPACITY);
        assert_eq!(tail_intent, 32);
        assert_eq!(tail, 32);
        assert_eq!(latest, 16);

        assert_eq!(view.get_i32(length_offset(0)), 16);
        assert_eq!(view.get_i32(type_offset(0)), 1);
        assert_eq!(view.get_i32(length_offset(16)), 16);
        assert_eq!(view.get_i32(type_offset(16)), 2);
    }

    #[test]
    fn transmit_exact_fit_at_wrap_needs_no_padding() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        // Place the tail 24 bytes short of the wrap; a 16-byte message fits
        // exactly.
        view.put_i64(CAPACITY + TAIL_COUNTER_OFFSET, 1000);
        view.put_i64(CAPACITY + TAIL_INTENT_COUNTER_OFFSET, 1000);

        tx.transmit(1, &[0x33; 16], 0, 16).unwrap();

        let (tail_intent, tail, latest) = counters(&view, CAPACITY);
        assert_eq!(tail_intent, 1024);
        assert_eq!(tail, 1024);
        assert_eq!(latest, 1000);

        assert_eq!(view.get_i32(length_offset(1000)), 24);
        assert_eq!(view.get_i32(type_offset(1000)), 1);
    }

    #[test]
    fn transmit_wraps_with_padding_record() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        view.put_i64(CAPACITY + TAIL_COUNTER_OFFSET, 1000);
        view.put_i64(CAPACITY + TAIL_INTENT_COUNTER_OFFSET, 1000);

        let payload: Vec<u8> = (0..32).collect();
        tx.transmit(9, &payload, 0, 32).unwrap();

        // Padding record fills the 24 bytes to the wrap boundary.
        assert_eq!(view.get_i32(length_offset(1000)), 24);
        assert_eq!(view.get_i32(type_offset(1000)), PADDING_MSG_TYPE_ID);

        // The real record restarts at offset zero.
        assert_eq!(view.get_i32(length_offset(0)), 40);
        assert_eq!(view.get_i32(type_offset(0)), 9);
        let mut bytes = [0u8; 32];
        view.get_bytes(msg_offset(0), &mut bytes);
        assert_eq!(bytes[..], payload[..]);

        let (tail_intent, tail, latest) = counters(&view, CAPACITY);
        assert_eq!(tail_intent, 1064);
        assert_eq!(tail, 1064);
        assert_eq!(latest, 1024);
    }

    #[test]
    fn transmit_rejects_invalid_msg_type_id() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        for bad in [0, PADDING_MSG_TYPE_ID, -7] {
            assert!(matches!(
                tx.transmit(bad, &[0u8; 4], 0, 4),
                Err(Error::InvalidMsgTypeId { msg_type_id }) if msg_type_id == bad
            ));
        }

        // Nothing reached the region.
        assert_eq!(counters(&view, CAPACITY), (0, 0, 0));
        assert_eq!(view.get_i32(length_offset(0)), 0);
    }

    #[test]
    fn transmit_rejects_oversize_message() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        let oversize = vec![0u8; CAPACITY / 8 + 1];
        assert!(matches!(
            tx.transmit(1, &oversize, 0, oversize.len()),
            Err(Error::MessageTooLong { length, max_msg_length })
                if length == CAPACITY / 8 + 1 && max_msg_length == CAPACITY / 8
        ));

        assert_eq!(counters(&view, CAPACITY), (0, 0, 0));
    }

    #[test]
    fn transmit_rejects_out_of_bounds_source() {
        let tx = Transmitter::new(region()).unwrap();

        let src = [0u8; 4];
        assert!(matches!(
            tx.transmit(1, &src, 2, 4),
            Err(Error::SourceOutOfBounds { src_offset: 2, length: 4, src_len: 4 })
        ));
        assert!(matches!(
            tx.transmit(1, &src, usize::MAX, 2),
            Err(Error::SourceOutOfBounds { .. })
        ));
    }

    #[test]
    fn transmit_honours_source_sub_slice() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        tx.transmit(3, &src, 2, 4).unwrap();

        assert_eq!(view.get_i32(length_offset(0)), 12);
        let mut bytes = [0u8; 4];
        view.get_bytes(msg_offset(0), &mut bytes);
        assert_eq!(bytes, [3, 4, 5, 6]);
    }

    #[test]
    fn transmitter_resumes_from_existing_tail() {
        let region = region();
        let view = view_of(&region);

        {
            let tx = Transmitter::new(Arc::clone(&region)).unwrap();
            tx.transmit(1, &[0x44; 16], 0, 16).unwrap();
        }

        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        tx.transmit(2, &[0x55; 8], 0, 8).unwrap();

        let (_, tail, latest) = counters(&view, CAPACITY);
        assert_eq!(tail, 40);
        assert_eq!(latest, 24);
        assert_eq!(view.get_i32(type_offset(24)), 2);
    }

    #[test]
    fn tail_intent_always_leads_tail() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        // Enough traffic to wrap several times.
        for i in 0..200 {
            let payload = vec![i as u8; 1 + (i * 7) % 100];
            tx.transmit(1 + (i % 3) as i32, &payload, 0, payload.len())
                .unwrap();

            let (tail_intent, tail, _) = counters(&view, CAPACITY);
            assert!(tail_intent >= tail, "intent {tail_intent} behind tail {tail}");
        }
    }

    #[test]
    fn tail_accounts_for_aligned_lengths_and_padding() {
        let region = region();
        let view = view_of(&region);
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        let sizes = [16usize, 100, 3, 128, 77, 1, 64, 9];
        let mut expected_tail: i64 = 0;

        for (i, &size) in sizes.iter().enumerate() {
            let aligned = align_up(size + HEADER_LENGTH, RECORD_ALIGNMENT) as i64;
            let offset = expected_tail & (CAPACITY as i64 - 1);
            let to_end = CAPACITY as i64 - offset;
            if to_end < aligned {
                expected_tail += to_end;
            }
            expected_tail += aligned;

            let payload = vec![i as u8; size];
            tx.transmit(1, &payload, 0, size).unwrap();

            let (_, tail, _) = counters(&view, CAPACITY);
            assert_eq!(tail, expected_tail, "after message {i}");
        }
    }

    #[test]
    fn receiver_round_trips_messages_in_order() {
        let region = region();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        let mut rx = Receiver::new(region).unwrap();

        assert!(rx.try_recv().is_none());

        // Long enough to wrap the 1024-byte ring several times; the
        // receiver keeps up, so nothing is lost and padding stays invisible.
        for i in 0..100u32 {
            let size = 1 + (i as usize * 13) % 100;
            let payload: Vec<u8> = (0..size).map(|b| (b as u32 ^ i) as u8).collect();
            let msg_type_id = 1 + (i % 5) as i32;

            tx.transmit(msg_type_id, &payload, 0, size).unwrap();

            let (received_type, received) = rx.try_recv().expect("message must be pending");
            assert_eq!(received_type, msg_type_id);
            assert_eq!(received, &payload[..]);
            assert!(rx.try_recv().is_none());
        }

        assert_eq!(rx.lapped_count(), 0);
    }

    #[test]
    fn receiver_skips_padding_transparently() {
        let region = region();
        let view = view_of(&region);

        // Start just short of the wrap so the first message forces padding.
        view.put_i64(CAPACITY + TAIL_COUNTER_OFFSET, 1000);
        view.put_i64(CAPACITY + TAIL_INTENT_COUNTER_OFFSET, 1000);

        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        let mut rx = Receiver::new(region).unwrap();

        tx.transmit(4, &[0x77; 32], 0, 32).unwrap();

        let (msg_type_id, payload) = rx.try_recv().unwrap();
        assert_eq!(msg_type_id, 4);
        assert_eq!(payload, &[0x77; 32]);
        assert_eq!(rx.lapped_count(), 0);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn lapped_receiver_resynchronises_to_latest() {
        let region = HeapRegion::new(MIN_CAPACITY).unwrap();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        let mut rx = Receiver::new(region).unwrap();

        // 24 records of 16 aligned bytes each: six laps of a 64-byte ring
        // while the receiver sleeps.
        for i in 0..24u64 {
            tx.transmit(1, &i.to_le_bytes(), 0, 8).unwrap();
        }

        let (msg_type_id, payload) = rx.try_recv().expect("latest record must be available");
        assert_eq!(msg_type_id, 1);
        assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), 23);
        assert_eq!(rx.lapped_count(), 1);

        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn validate_fails_after_producer_overruns_reader() {
        let region = HeapRegion::new(MIN_CAPACITY).unwrap();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        let mut rx = Receiver::new(region).unwrap();

        tx.transmit(1, &[0u8; 8], 0, 8).unwrap();
        assert!(rx.receive_next());
        assert!(rx.validate());

        // The producer floods more than one capacity past the reader's
        // cursor before the reader finishes with the record.
        for i in 0..24u64 {
            tx.transmit(1, &i.to_le_bytes(), 0, 8).unwrap();
        }
        assert!(!rx.validate());

        // The safe path recovers on its own: skip to the latest record.
        let (_, payload) = rx.try_recv().unwrap();
        assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), 23);
        assert!(rx.lapped_count() >= 1);
    }

    #[test]
    fn late_joiner_from_latest_sees_most_recent_message() {
        let region = region();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        for i in 1..=3u8 {
            tx.transmit(i as i32, &[i; 8], 0, 8).unwrap();
        }

        let mut rx = Receiver::new_from_latest(region).unwrap();
        let (msg_type_id, payload) = rx.try_recv().unwrap();
        assert_eq!(msg_type_id, 3);
        assert_eq!(payload, &[3u8; 8]);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn cloned_receivers_progress_independently() {
        let region = region();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();
        let mut rx = Receiver::new(region).unwrap();

        tx.transmit(1, &[0xA1; 8], 0, 8).unwrap();
        let mut rx2 = rx.clone();

        let (type_a, payload_a) = rx.try_recv().unwrap();
        assert_eq!((type_a, payload_a), (1, &[0xA1; 8][..]));

        // The clone starts from the same cursor and sees the same message.
        let (type_b, payload_b) = rx2.try_recv().unwrap();
        assert_eq!((type_b, payload_b), (1, &[0xA1; 8][..]));

        tx.transmit(2, &[0xB2; 8], 0, 8).unwrap();
        assert_eq!(rx.try_recv().unwrap().0, 2);
        assert_eq!(rx2.try_recv().unwrap().0, 2);
    }

    #[test]
    fn local_channel_pairs_transmitter_and_receiver() {
        let (tx, mut rx) = local_channel(CAPACITY).unwrap();

        tx.transmit(1, b"hello", 0, 5).unwrap();
        tx.transmit(2, b"world", 0, 5).unwrap();

        assert_eq!(rx.try_recv().unwrap(), (1, &b"hello"[..]));
        assert_eq!(rx.try_recv().unwrap(), (2, &b"world"[..]));
        assert!(rx.try_recv().is_none());

        assert!(matches!(
            local_channel(1000),
            Err(Error::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn broadcast_across_threads_is_ordered() {
        const MESSAGES: u64 = 20_000;
        const RING: usize = 1 << 16;

        let region = HeapRegion::new(RING).unwrap();
        let tx = Transmitter::new(Arc::clone(&region)).unwrap();

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let mut rx = Receiver::new(Arc::clone(&region)).unwrap();
                std::thread::spawn(move || {
                    let mut previous: Option<u64> = None;
                    loop {
                        let Some((msg_type_id, payload)) = rx.try_recv() else {
                            std::hint::spin_loop();
                            continue;
                        };
                        assert_eq!(msg_type_id, 1);
                        let seq = u64::from_le_bytes(payload[..8].try_into().unwrap());
                        if let Some(prev) = previous {
                            assert!(seq > prev, "sequence went backwards: {prev} -> {seq}");
                        }
                        previous = Some(seq);
                        if seq == MESSAGES - 1 {
                            break;
                        }
                    }
                    rx.lapped_count()
                })
            })
            .collect();

        let writer = std::thread::spawn(move || {
            let mut payload = [0u8; 16];
            for seq in 0..MESSAGES {
                payload[..8].copy_from_slice(&seq.to_le_bytes());
                tx.transmit(1, &payload, 0, 16).unwrap();
            }
        });

        writer.join().unwrap();
        for reader in readers {
            // Laps are admissible under load; going backwards is not.
            let _ = reader.join().unwrap();
        }
    }

    #[test]
    fn shm_channel_round_trips_between_mappings() {
        let name = format!(
            "/bcast-test-{}-{}",
            std::process::id(),
            crate::stats::mono_time_ns()
        );

        {
            let (tx, _rx) = channel(&name, CAPACITY).unwrap();
            tx.transmit(5, b"across mappings", 0, 15).unwrap();

            // A second, independent mapping of the same segment observes the
            // committed record.
            let region = ShmRegion::create(&name, CAPACITY).unwrap();
            let mut rx = Receiver::new_from_latest(region).unwrap();
            let (msg_type_id, payload) = rx.try_recv().unwrap();
            assert_eq!(msg_type_id, 5);
            assert_eq!(payload, b"across mappings");
        }

        ShmRegion::unlink(&name).unwrap();
    }
}
