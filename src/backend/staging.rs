//! Staging buffers for relayed transfers
//! Holds one preallocated scratch buffer per device, sized once from the plan

use crate::backend::DeviceBuffer;
use crate::context::DeviceContext;
use crate::error::{CommError, CommResult};

/// Per-device staging buffers owned by one engine
#[derive(Debug)]
pub struct StagingBufferSet {
    buffers: Vec<DeviceBuffer>,
    lengths: Vec<usize>,
}

impl StagingBufferSet {
    /// Allocate `lengths[i]` elements on logical device `i`, in index order.
    ///
    /// On failure the buffers allocated so far are released before the
    /// error is returned.
    pub fn allocate(ctx: &DeviceContext, lengths: &[usize]) -> CommResult<Self> {
        if lengths.len() != ctx.num_devices() {
            return Err(CommError::InvalidConfiguration(format!(
                "{} staging lengths given for {} devices",
                lengths.len(),
                ctx.num_devices()
            )));
        }

        let mut buffers = Vec::with_capacity(lengths.len());
        for (device, &elements) in lengths.iter().enumerate() {
            match ctx.allocate(device, elements) {
                Ok(buffer) => buffers.push(buffer),
                Err(CommError::Device(source)) => {
                    tracing::warn!(
                        "StagingBufferSet::allocate: device {} could not hold {} elements, releasing {} buffers",
                        device,
                        elements,
                        buffers.len()
                    );
                    drop(buffers);
                    return Err(CommError::DeviceAllocationFailure {
                        device,
                        elements,
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(StagingBufferSet {
            buffers,
            lengths: lengths.to_vec(),
        })
    }

    /// Staging buffer of logical device `device`
    pub fn buffer(&self, device: usize) -> Option<&DeviceBuffer> {
        self.buffers.get(device)
    }

    /// Provisioned length of every buffer in elements
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Get total memory usage in bytes
    pub fn total_memory_usage(&self) -> usize {
        self.buffers.iter().map(DeviceBuffer::size).sum()
    }

    /// Check that every buffer can hold `required[i]` elements
    pub fn validate_invariants(&self, required: &[usize]) -> CommResult<()> {
        if required.len() != self.buffers.len() {
            return Err(CommError::InvalidConfiguration(format!(
                "staging requirement covers {} devices, set has {}",
                required.len(),
                self.buffers.len()
            )));
        }

        for (device, (buffer, &needed)) in self.buffers.iter().zip(required).enumerate() {
            if buffer.len() < needed {
                return Err(CommError::PreconditionViolation(format!(
                    "staging buffer of device {} holds {} elements, {} needed",
                    device,
                    buffer.len(),
                    needed
                )));
            }
        }

        Ok(())
    }
}
