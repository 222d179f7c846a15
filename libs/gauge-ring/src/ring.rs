//! Lock-free SP-MC ring of normalized records
//!
//! One producer process pushes at its own cadence; any number of consumer
//! processes read latest-only and tolerate loss. The producer may race
//! ahead of a consumer by more than the ring size; consumers detect torn
//! slots by CRC and discard them, there are no per-slot version counters.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::ndm::NormalizedRecord;

/// Ring capacity; must be a power of two
pub const RING_SIZE: usize = 1024;

/// Cache-line-aligned ring header + slot array.
///
/// Lives verbatim inside the shared-memory region, so the layout is part of
/// the inter-process contract. Only the producer mutates `write_idx`;
/// `read_idx` is a shared consumer cursor advanced by `pop_latest`.
#[repr(C, align(64))]
pub struct RingBuffer {
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    records: [UnsafeCell<NormalizedRecord>; RING_SIZE],
}

// Slot tearing is detected by record CRC; the counters are atomic.
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Total byte size of the ring structure in shared memory
    pub const fn byte_size() -> usize {
        std::mem::size_of::<RingBuffer>()
    }

    /// Heap-allocated zeroed ring, for in-process use and tests
    pub fn new_boxed() -> Box<RingBuffer> {
        // Zero bits are a valid initial state for every field
        unsafe { Box::new(std::mem::zeroed()) }
    }

    /// Reset both counters; the creator calls this once after mapping
    pub fn init(&self) {
        self.write_idx.store(0, Ordering::Relaxed);
        self.read_idx.store(0, Ordering::Relaxed);
    }

    /// Publish a record. Never blocks, never fails.
    ///
    /// The index is claimed with a relaxed increment, the slot is written,
    /// then a release fence makes the bytes visible to any consumer that
    /// subsequently acquires `write_idx`.
    pub fn push(&self, record: &NormalizedRecord) {
        let idx = self.write_idx.fetch_add(1, Ordering::Relaxed) as usize % RING_SIZE;
        unsafe {
            ptr::write_volatile(self.records[idx].get(), *record);
        }
        fence(Ordering::Release);
    }

    /// Read the most recent record and advance the shared read cursor.
    ///
    /// Returns `None` when nothing was published since the last pop.
    /// Intermediate records between the cursor and `write_idx` are skipped
    /// on purpose: consumers are latest-only.
    pub fn pop_latest(&self) -> Option<NormalizedRecord> {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Relaxed);

        if w == r {
            return None;
        }

        let idx = w.wrapping_sub(1) as usize % RING_SIZE;
        let record = unsafe { ptr::read_volatile(self.records[idx].get()) };

        self.read_idx.store(w, Ordering::Release);
        Some(record)
    }

    /// Non-destructive read of the most recent record.
    ///
    /// `last_seen` is the caller's own view of `write_idx`; when nothing new
    /// was published the call returns `None`. On success the new cursor
    /// value is returned alongside the record.
    pub fn peek_latest(&self, last_seen: u32) -> Option<(u32, NormalizedRecord)> {
        let w = self.write_idx.load(Ordering::Acquire);
        if w == last_seen {
            return None;
        }

        let idx = w.wrapping_sub(1) as usize % RING_SIZE;
        let record = unsafe { ptr::read_volatile(self.records[idx].get()) };
        Some((w, record))
    }

    /// Unread count as seen through the shared cursor.
    ///
    /// May transiently overcount while a push is in flight.
    pub fn size(&self) -> u32 {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Whether no unread records are pending
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Current producer cursor, for consumers that keep their own view
    pub fn write_index(&self) -> u32 {
        self.write_idx.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn force_indices(&self, write: u32, read: u32) {
        self.write_idx.store(write, Ordering::SeqCst);
        self.read_idx.store(read, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn corrupt_slot(&self, slot: usize) {
        unsafe {
            let rec = &mut *self.records[slot % RING_SIZE].get();
            rec.thickness_mm += 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndm::{status, NormalizedRecord};

    fn record(sequence: u32, thickness: f32) -> NormalizedRecord {
        let mut rec = NormalizedRecord {
            timestamp_ns: sequence as u64 * 1_000,
            sequence,
            thickness_mm: thickness,
            status: status::ALL_OK,
            ..Default::default()
        };
        rec.set_crc();
        rec
    }

    #[test]
    fn test_empty_ring() {
        let ring = RingBuffer::new_boxed();
        assert!(ring.is_empty());
        assert_eq!(ring.size(), 0);
        assert!(ring.pop_latest().is_none());
        assert!(ring.peek_latest(0).is_none());
    }

    #[test]
    fn test_push_pop_latest() {
        let ring = RingBuffer::new_boxed();

        ring.push(&record(1, 1.1));
        ring.push(&record(2, 1.2));
        ring.push(&record(3, 1.3));
        assert_eq!(ring.size(), 3);

        // Latest-only: intermediate records are skipped
        let rec = ring.pop_latest().expect("record available");
        assert_eq!(rec.sequence, 3);
        assert!(rec.verify_crc());

        // Cursor advanced past everything
        assert!(ring.pop_latest().is_none());
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let ring = RingBuffer::new_boxed();
        ring.push(&record(5, 1.5));

        let (seen, rec) = ring.peek_latest(0).expect("record available");
        assert_eq!(rec.sequence, 5);

        // Same cursor: nothing new
        assert!(ring.peek_latest(seen).is_none());

        // The shared read cursor was untouched; pop still sees the record
        let popped = ring.pop_latest().expect("record available");
        assert_eq!(popped.sequence, 5);
    }

    #[test]
    fn test_peek_sees_new_publications() {
        let ring = RingBuffer::new_boxed();
        ring.push(&record(1, 1.0));
        let (seen, _) = ring.peek_latest(0).unwrap();

        ring.push(&record(2, 2.0));
        let (_, rec) = ring.peek_latest(seen).expect("new record visible");
        assert_eq!(rec.sequence, 2);
    }

    #[test]
    fn test_wraparound_beyond_capacity() {
        let ring = RingBuffer::new_boxed();
        for i in 0..(RING_SIZE as u32 * 2 + 5) {
            ring.push(&record(i, i as f32));
        }
        let rec = ring.pop_latest().expect("record available");
        assert_eq!(rec.sequence, RING_SIZE as u32 * 2 + 4);
        assert!(rec.verify_crc());
    }

    #[test]
    fn test_index_wraparound_at_u32_max() {
        let ring = RingBuffer::new_boxed();
        ring.force_indices(u32::MAX, u32::MAX);

        ring.push(&record(99, 1.9));
        // write_idx wrapped to 0; the consumer must still see a coherent record
        let rec = ring.pop_latest().expect("record available");
        assert_eq!(rec.sequence, 99);
        assert!(rec.verify_crc());
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn test_torn_slot_fails_crc() {
        let ring = RingBuffer::new_boxed();
        ring.push(&record(1, 1.5));

        // Flip bytes in the slot after publication, as a mid-write
        // wrap-around would
        ring.corrupt_slot(0);

        let rec = ring.pop_latest().expect("raw read still returns the slot");
        assert!(!rec.verify_crc());
    }

    #[test]
    fn test_size_counts_modulo() {
        let ring = RingBuffer::new_boxed();
        ring.force_indices(3, u32::MAX.wrapping_sub(1));
        // 3 - (2^32 - 2) mod 2^32 = 5
        assert_eq!(ring.size(), 5);
    }
}
