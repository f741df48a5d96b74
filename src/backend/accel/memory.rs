//! Device buffer wrapper for device-resident memory

use std::sync::{Arc, RwLock};

use crate::backend::accel::device::Device;
use crate::backend::accel::error::{DeviceError, DeviceResult};
use crate::backend::accel::stream::DeviceStream;

/// Element type moved by the transfer engines
pub type Element = f32;

/// DeviceBuffer wrapper using Arc for safe, cheap cloning
///
/// Clones share the same device memory; the pool reservation is returned
/// once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    inner: Arc<DeviceBufferInner>,
}

#[derive(Debug)]
struct DeviceBufferInner {
    device: Arc<Device>,
    len: usize,
    data: RwLock<Vec<Element>>,
}

impl Drop for DeviceBufferInner {
    fn drop(&mut self) {
        tracing::trace!(
            "DeviceBuffer::drop: releasing {} elements on device {}",
            self.len,
            self.device.id()
        );
        self.device.release(bytes_for(self.len));
    }
}

fn bytes_for(len: usize) -> usize {
    len * std::mem::size_of::<Element>()
}

impl DeviceBuffer {
    /// Allocate `len` zeroed elements on `device`
    pub fn new(device: &Arc<Device>, len: usize) -> DeviceResult<Self> {
        let bytes = len.checked_mul(std::mem::size_of::<Element>()).ok_or_else(|| {
            DeviceError::MemoryAllocationFailed(format!("{} elements overflow usize bytes", len))
        })?;
        tracing::trace!(
            "DeviceBuffer::new: Allocating {} bytes on device {}",
            bytes,
            device.id()
        );
        device.reserve(bytes)?;

        Ok(DeviceBuffer {
            inner: Arc::new(DeviceBufferInner {
                device: Arc::clone(device),
                len,
                data: RwLock::new(vec![0.0; len]),
            }),
        })
    }

    /// Length in elements
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Get buffer size in bytes
    pub fn size(&self) -> usize {
        bytes_for(self.inner.len)
    }

    /// Physical id of the owning device
    pub fn device_id(&self) -> usize {
        self.inner.device.id()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.inner.device
    }

    /// True if both handles refer to the same allocation
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy data from host to the start of this buffer (blocking)
    pub fn copy_from_host(&self, data: &[Element]) -> DeviceResult<()> {
        if data.len() > self.len() {
            return Err(DeviceError::MemoryCopyFailed(format!(
                "Source data too large: {} > {} elements",
                data.len(),
                self.len()
            )));
        }
        self.inner.data.write()?[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy the start of this buffer to host memory (blocking)
    pub fn copy_to_host(&self, out: &mut [Element]) -> DeviceResult<()> {
        if out.len() > self.len() {
            return Err(DeviceError::MemoryCopyFailed(format!(
                "Destination larger than buffer: {} > {} elements",
                out.len(),
                self.len()
            )));
        }
        out.copy_from_slice(&self.inner.data.read()?[..out.len()]);
        Ok(())
    }

    /// Download the whole buffer into a new host vector
    pub fn to_host_vec(&self) -> DeviceResult<Vec<Element>> {
        Ok(self.inner.data.read()?.clone())
    }

    /// Enqueue a device-to-device copy of `len` elements on `stream`.
    ///
    /// Bounds are checked before queuing; the copy itself runs when the
    /// stream reaches it. Source and destination may live on different
    /// devices or be the same buffer.
    pub fn copy_async(
        dst: &DeviceBuffer,
        dst_offset: usize,
        src: &DeviceBuffer,
        src_offset: usize,
        len: usize,
        stream: &DeviceStream,
    ) -> DeviceResult<()> {
        check_region("source", src, src_offset, len)?;
        check_region("destination", dst, dst_offset, len)?;
        tracing::trace!(
            "DeviceBuffer::copy_async: {} elements dev{}[{}] -> dev{}[{}] on stream {}",
            len,
            src.device_id(),
            src_offset,
            dst.device_id(),
            dst_offset,
            stream.device_id()
        );

        let src = src.clone();
        let dst = dst.clone();
        stream.enqueue(move || {
            // Stage through a scratch vector so opposite-direction copies
            // never hold both locks at once
            let chunk = src.inner.data.read()?[src_offset..src_offset + len].to_vec();
            dst.inner.data.write()?[dst_offset..dst_offset + len].copy_from_slice(&chunk);
            Ok(())
        })
    }
}

fn check_region(role: &str, buffer: &DeviceBuffer, offset: usize, len: usize) -> DeviceResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer.len() => Ok(()),
        _ => Err(DeviceError::MemoryCopyFailed(format!(
            "{} region out of bounds: offset={} len={} buffer_len={}",
            role,
            offset,
            len,
            buffer.len()
        ))),
    }
}
