//! GaugeLink Shared Ring Library
//!
//! The inter-process live-reading fabric: a fixed 24-byte normalized record
//! with an integrity tag, a single-producer / multi-consumer lock-free ring,
//! and the POSIX shared-memory handle the daemons share it through.

pub mod error;
pub mod ndm;
pub mod ring;
pub mod shm;

pub use error::{Result, RingError};
pub use ndm::{status, NormalizedRecord};
pub use ring::{RingBuffer, RING_SIZE};
pub use shm::{ShmRing, SHM_NAME};
