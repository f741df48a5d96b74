//! Multi-device context
//!
//! A [`DeviceContext`] turns "N accelerators with independent execution
//! queues" into a single handle: logical indices `0..num_gpu`, a fixed
//! logical → physical id mapping, one stream per device, and the peer
//! topology that decides which devices may copy directly.

use std::sync::Arc;

use crate::backend::{Device, DeviceBuffer, DeviceStream};
use crate::config::{ContextConfig, PeerTopology};
use crate::error::{CommError, CommResult};

/// Set of participating devices with one execution stream each
#[derive(Debug)]
pub struct DeviceContext {
    devices: Vec<Arc<Device>>,
    streams: Vec<DeviceStream>,
    topology: PeerTopology,
}

impl DeviceContext {
    /// Enumerate `num_gpu` devices with default configuration
    pub fn new(num_gpu: usize) -> CommResult<Self> {
        Self::with_config(&ContextConfig::new(num_gpu))
    }

    /// Enumerate devices as described by `config`.
    ///
    /// Devices are touched exactly once, in logical index order.
    pub fn with_config(config: &ContextConfig) -> CommResult<Self> {
        config.validate()?;

        let physical_ids = config.physical_ids();
        let mut devices = Vec::with_capacity(config.num_gpu);
        let mut streams = Vec::with_capacity(config.num_gpu);
        for (logical, &physical) in physical_ids.iter().enumerate() {
            tracing::debug!(
                "DeviceContext: logical device {} -> physical device {}",
                logical,
                physical
            );
            devices.push(Arc::new(Device::new(physical, config.device_memory_bytes)));
            streams.push(DeviceStream::new(physical)?);
        }

        Ok(DeviceContext {
            devices,
            streams,
            topology: config.resolved_topology(),
        })
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    fn check_index(&self, logical: usize) -> CommResult<()> {
        if logical < self.devices.len() {
            Ok(())
        } else {
            Err(CommError::InvalidDeviceIndex {
                index: logical,
                num_devices: self.devices.len(),
            })
        }
    }

    /// Physical id of logical device `logical`
    pub fn get_device_id(&self, logical: usize) -> CommResult<usize> {
        self.check_index(logical)?;
        Ok(self.devices[logical].id())
    }

    pub fn device(&self, logical: usize) -> CommResult<&Arc<Device>> {
        self.check_index(logical)?;
        Ok(&self.devices[logical])
    }

    pub fn stream(&self, logical: usize) -> CommResult<&DeviceStream> {
        self.check_index(logical)?;
        Ok(&self.streams[logical])
    }

    pub fn topology(&self) -> &PeerTopology {
        &self.topology
    }

    /// True if logical device `from` can copy directly into `to`
    pub fn can_access_peer(&self, from: usize, to: usize) -> bool {
        self.topology.can_access_peer(from, to)
    }

    /// Allocate `len` elements on logical device `logical`
    pub fn allocate(&self, logical: usize, len: usize) -> CommResult<DeviceBuffer> {
        let device = self.device(logical)?;
        Ok(DeviceBuffer::new(device, len)?)
    }

    /// True if `buffer` was allocated on this context's logical device `logical`
    pub fn owns(&self, logical: usize, buffer: &DeviceBuffer) -> bool {
        self.devices
            .get(logical)
            .is_some_and(|device| Arc::ptr_eq(device, buffer.device()))
    }

    /// Block until every stream of the context has drained.
    ///
    /// Covers all work in flight, whichever engine issued it.
    pub fn sync_hard(&self) -> CommResult<()> {
        tracing::trace!("DeviceContext::sync_hard: draining {} streams", self.streams.len());
        for stream in &self.streams {
            stream.synchronize()?;
        }
        Ok(())
    }
}
