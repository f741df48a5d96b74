//! Configuration for device contexts
//!
//! [`ContextConfig`] decides which physical devices a context enumerates,
//! how much memory each device pool holds, and which device pairs can copy
//! directly ([`PeerTopology`]).

use crate::error::{CommError, CommResult};

/// Default per-device memory pool: 1 GiB
pub const DEFAULT_DEVICE_MEMORY_BYTES: usize = 1 << 30;

/// Which logical device pairs can copy to each other directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTopology {
    num_devices: usize,
    /// Row-major `num_devices x num_devices` adjacency
    links: Vec<bool>,
}

impl PeerTopology {
    /// Every device can reach every other device
    pub fn fully_connected(num_devices: usize) -> Self {
        PeerTopology {
            num_devices,
            links: vec![true; num_devices * num_devices],
        }
    }

    /// Only the listed pairs (in both directions) plus self-copies
    pub fn from_links(num_devices: usize, links: &[(usize, usize)]) -> CommResult<Self> {
        let mut topology = PeerTopology {
            num_devices,
            links: vec![false; num_devices * num_devices],
        };
        for device in 0..num_devices {
            topology.links[device * num_devices + device] = true;
        }
        for &(a, b) in links {
            if a >= num_devices || b >= num_devices {
                return Err(CommError::InvalidConfiguration(format!(
                    "peer link ({}, {}) out of range for {} devices",
                    a, b, num_devices
                )));
            }
            topology.links[a * num_devices + b] = true;
            topology.links[b * num_devices + a] = true;
        }
        Ok(topology)
    }

    /// Devices connected in a line: 0-1, 1-2, ...
    pub fn chain(num_devices: usize) -> Self {
        let mut links = vec![false; num_devices * num_devices];
        for a in 0..num_devices {
            for b in 0..num_devices {
                links[a * num_devices + b] = a.abs_diff(b) <= 1;
            }
        }
        PeerTopology { num_devices, links }
    }

    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    /// True if `from` can copy straight into `to`. Out-of-range indices are
    /// never connected.
    pub fn can_access_peer(&self, from: usize, to: usize) -> bool {
        from < self.num_devices
            && to < self.num_devices
            && self.links[from * self.num_devices + to]
    }
}

/// Configuration for a [`DeviceContext`](crate::context::DeviceContext)
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Number of devices to enumerate
    pub num_gpu: usize,

    /// Physical id for each logical index; `0..num_gpu` when unset
    pub device_ids: Option<Vec<usize>>,

    /// Memory pool size of every device in bytes
    pub device_memory_bytes: usize,

    /// Peer links between logical devices; fully connected when unset
    pub topology: Option<PeerTopology>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            num_gpu: 1,
            device_ids: None,
            device_memory_bytes: DEFAULT_DEVICE_MEMORY_BYTES,
            topology: None,
        }
    }
}

impl ContextConfig {
    /// Create a config for `num_gpu` devices with default values
    pub fn new(num_gpu: usize) -> Self {
        ContextConfig {
            num_gpu,
            ..Self::default()
        }
    }

    /// Set the logical → physical device mapping
    pub fn with_device_ids(mut self, device_ids: Vec<usize>) -> Self {
        self.device_ids = Some(device_ids);
        self
    }

    /// Set per-device memory pool size
    pub fn with_device_memory_bytes(mut self, device_memory_bytes: usize) -> Self {
        self.device_memory_bytes = device_memory_bytes;
        self
    }

    /// Set peer topology
    pub fn with_topology(mut self, topology: PeerTopology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Physical ids in logical order
    pub fn physical_ids(&self) -> Vec<usize> {
        self.device_ids
            .clone()
            .unwrap_or_else(|| (0..self.num_gpu).collect())
    }

    /// Resolved topology
    pub fn resolved_topology(&self) -> PeerTopology {
        self.topology
            .clone()
            .unwrap_or_else(|| PeerTopology::fully_connected(self.num_gpu))
    }

    /// Check the configuration is self-consistent
    pub fn validate(&self) -> CommResult<()> {
        if self.num_gpu == 0 {
            return Err(CommError::InvalidConfiguration(
                "a context needs at least one device".to_string(),
            ));
        }

        if let Some(ids) = &self.device_ids {
            if ids.len() != self.num_gpu {
                return Err(CommError::InvalidConfiguration(format!(
                    "{} device ids given for {} devices",
                    ids.len(),
                    self.num_gpu
                )));
            }
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(CommError::InvalidConfiguration(format!(
                    "physical device {} listed more than once",
                    pair[0]
                )));
            }
        }

        if let Some(topology) = &self.topology {
            if topology.num_devices() != self.num_gpu {
                return Err(CommError::InvalidConfiguration(format!(
                    "topology describes {} devices, context has {}",
                    topology.num_devices(),
                    self.num_gpu
                )));
            }
        }

        Ok(())
    }
}
