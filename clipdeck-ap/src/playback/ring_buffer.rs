//! Byte ring buffer between the decode step and the device output
//!
//! Holds processed output bytes (interleaved stereo f32 LE) that were
//! produced by the fill callback but not yet copied to the device. Both ends
//! are driven from the same callback, so the ring is used unsplit.

use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct OutputRing {
    buffer: HeapRb<u8>,
    /// Bytes dropped because the ring was full
    overruns: Arc<AtomicU64>,
}

impl OutputRing {
    pub fn new(capacity_bytes: usize) -> Self {
        debug!("Creating output ring with capacity: {} bytes", capacity_bytes);
        Self {
            buffer: HeapRb::new(capacity_bytes.max(1)),
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append bytes; whatever does not fit is dropped and counted
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let pushed = self.buffer.push_slice(bytes);
        if pushed < bytes.len() {
            let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 1 {
                warn!(
                    "Output ring overrun: dropped {} bytes (total overruns: {})",
                    bytes.len() - pushed,
                    count
                );
            }
        }
        pushed
    }

    /// Copy up to `dst.len()` bytes out of the ring
    pub fn pop_into(&mut self, dst: &mut [u8]) -> usize {
        self.buffer.pop_slice(dst)
    }

    pub fn occupied_len(&self) -> usize {
        self.buffer.occupied_len()
    }

    pub fn vacant_len(&self) -> usize {
        self.buffer.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity().into()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}
