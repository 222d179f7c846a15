//! POSIX shared-memory handle for the data ring
//!
//! The sampler creates the region, every publisher opens it. The handle
//! owns the mapping and exposes only ring operations; no references into
//! the mapped region leak across the API boundary.
//!
//! CRC verification is centralized here: a record that fails verification
//! (a torn read from a wrap-around mid-publication) is dropped with a
//! warning and never handed to a consumer.

use std::fs::File;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use tracing::{debug, warn};

use crate::error::{Result, RingError};
use crate::ndm::NormalizedRecord;
use crate::ring::RingBuffer;

/// Well-known name of the live-reading ring region
pub const SHM_NAME: &str = "/gw_data_ring";

/// Owned mapping of the shared ring region.
pub struct ShmRing {
    mmap: MmapMut,
    name: String,
    is_creator: bool,
    /// Per-handle peek cursor; distinct consumers do not coordinate
    last_peek: AtomicU32,
}

impl ShmRing {
    /// Create the well-known region, unlinking any previous instance.
    ///
    /// Called by the producer at startup.
    pub fn create() -> Result<Self> {
        Self::create_named(SHM_NAME)
    }

    /// Open the existing well-known region read-write.
    ///
    /// Called by consumers; fails until the producer has created it.
    pub fn open() -> Result<Self> {
        Self::open_named(SHM_NAME)
    }

    /// Create a region under an explicit name (tests use unique names)
    pub fn create_named(name: &str) -> Result<Self> {
        // A stale region from a crashed producer must not be reused
        let _ = shm_unlink(name);

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|source| RingError::CreateFailed {
            name: name.to_string(),
            source,
        })?;

        let size = RingBuffer::byte_size();
        nix::unistd::ftruncate(&fd, size as i64).map_err(|source| RingError::CreateFailed {
            name: name.to_string(),
            source,
        })?;

        let file = File::from(fd);
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };

        let ring = ShmRing {
            mmap,
            name: name.to_string(),
            is_creator: true,
            last_peek: AtomicU32::new(0),
        };
        ring.ring().init();

        debug!(name, size, "shared ring created");
        Ok(ring)
    }

    /// Open a region under an explicit name
    pub fn open_named(name: &str) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            RingError::OpenFailed {
                name: name.to_string(),
                source,
            }
        })?;

        let file = File::from(fd);
        let expected = RingBuffer::byte_size();
        let actual = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
        if actual < expected {
            return Err(RingError::SizeMismatch {
                name: name.to_string(),
                actual,
                expected,
            });
        }

        let mmap = unsafe { MmapOptions::new().len(expected).map_mut(&file)? };

        debug!(name, "shared ring opened");
        Ok(ShmRing {
            mmap,
            name: name.to_string(),
            is_creator: false,
            // Start peeking from the producer's current position
            last_peek: AtomicU32::new(0),
        })
    }

    fn ring(&self) -> &RingBuffer {
        // The mapping is page-aligned and sized to the ring structure
        unsafe { &*(self.mmap.as_ptr() as *const RingBuffer) }
    }

    /// Publish a record (producer only)
    pub fn push(&self, record: &NormalizedRecord) {
        self.ring().push(record);
    }

    /// Take the latest record, advancing the shared read cursor.
    ///
    /// Records failing CRC verification are dropped, never delivered.
    pub fn pop_latest(&self) -> Option<NormalizedRecord> {
        let record = self.ring().pop_latest()?;
        if !record.verify_crc() {
            warn!(
                sequence = record.sequence,
                "CRC verification failed, dropping record"
            );
            return None;
        }
        Some(record)
    }

    /// Non-destructive read of the latest record, gated per handle.
    ///
    /// Returns `None` until the producer publishes past this handle's last
    /// peek. Records failing CRC verification are dropped.
    pub fn peek_latest(&self) -> Option<NormalizedRecord> {
        let last = self.last_peek.load(Ordering::Relaxed);
        let (seen, record) = self.ring().peek_latest(last)?;
        self.last_peek.store(seen, Ordering::Relaxed);

        if !record.verify_crc() {
            warn!(
                sequence = record.sequence,
                "CRC verification failed, dropping record"
            );
            return None;
        }
        Some(record)
    }

    /// Unread count through the shared cursor
    pub fn size(&self) -> u32 {
        self.ring().size()
    }

    /// Whether no unread records are pending
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }
}

impl Drop for ShmRing {
    fn drop(&mut self) {
        if self.is_creator {
            if let Err(err) = shm_unlink(self.name.as_str()) {
                warn!(name = %self.name, %err, "failed to unlink shared ring");
            }
        }
    }
}
