//! Device handle and per-device memory pool accounting

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::accel::error::{DeviceError, DeviceResult};

/// A single accelerator participating in a context.
///
/// Owns the accounting for its memory pool. Buffers reserve bytes on
/// creation and give them back when their last handle is dropped.
#[derive(Debug)]
pub struct Device {
    id: usize,
    name: String,
    total_memory: usize,
    allocated: AtomicUsize,
}

impl Device {
    /// Create a device with the given physical id and pool size in bytes
    pub fn new(id: usize, total_memory: usize) -> Self {
        tracing::debug!(
            "Device::new: physical id {} with {} MB pool",
            id,
            total_memory / 1024 / 1024
        );
        Device {
            id,
            name: format!("accelerator:{}", id),
            total_memory,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Physical device id
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total pool size in bytes
    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Bytes currently held by live buffers
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Get memory info as `(free, total)` in bytes
    pub fn get_memory_info(&self) -> (usize, usize) {
        let used = self.allocated_bytes();
        (self.total_memory.saturating_sub(used), self.total_memory)
    }

    /// Reserve `bytes` from the pool, failing if the pool cannot hold them
    pub(crate) fn reserve(&self, bytes: usize) -> DeviceResult<()> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes)
                    .filter(|&next| next <= self.total_memory)
            })
            .map(|_| ())
            .map_err(|used| {
                tracing::error!(
                    "Device {}: allocation of {} bytes failed ({} of {} bytes in use)",
                    self.id,
                    bytes,
                    used,
                    self.total_memory
                );
                DeviceError::MemoryAllocationFailed(format!(
                    "device {} cannot hold {} more bytes ({} of {} in use)",
                    self.id, bytes, used, self.total_memory
                ))
            })
    }

    /// Return `bytes` to the pool
    pub(crate) fn release(&self, bytes: usize) {
        let previous = self.allocated.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(previous >= bytes, "device {} released more than it held", self.id);
    }
}
