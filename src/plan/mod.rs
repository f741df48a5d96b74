//! Transfer plans
//!
//! A [`TransferPlan`] says, for every device, along which path of devices its
//! slice travels. Paths have `num_steps + 1` entries; entry `k` is where the
//! data sits after step `k`. Repeating a device means the data waits there
//! for one step. A device's slice may be cut into `num_chunks` parts that
//! travel along different paths; each sequence declares how many parts it
//! carries.
//!
//! Gather plans have every path end at `main_gpu`; scatter plans have every
//! path start there.

mod loader;
mod schedule;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use schedule::{Endpoint, Transfer, TransferSchedule};

/// Direction of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    /// Many-to-one
    Gather,
    /// One-to-many
    Scatter,
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanKind::Gather => write!(f, "gather"),
            PlanKind::Scatter => write!(f, "scatter"),
        }
    }
}

/// Reasons a plan is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no devices")]
    NoDevices,
    #[error("main device {main_gpu} out of range for {num_gpus} devices")]
    MainGpuOutOfRange { main_gpu: usize, num_gpus: usize },
    #[error("plan splits data into zero chunks")]
    NoChunks,
    #[error("plan has {num_steps} steps, more than a path can hold")]
    TooManySteps { num_steps: usize },
    #[error("plan has no transfer sequences")]
    NoSequences,
    #[error("sequence {sequence} has {actual} entries, expected {expected}")]
    PathLength {
        sequence: usize,
        expected: usize,
        actual: usize,
    },
    #[error("sequence {sequence} names device {device}, plan has {num_gpus}")]
    DeviceOutOfRange {
        sequence: usize,
        device: usize,
        num_gpus: usize,
    },
    #[error("sequence {sequence} carries no chunks")]
    EmptySequence { sequence: usize },
    #[error("sequence {sequence} returns to device {device} after leaving it")]
    RevisitedDevice { sequence: usize, device: usize },
    #[error("expected a {expected} plan, got a {actual} plan")]
    WrongKind { expected: PlanKind, actual: PlanKind },
    #[error("sequence {sequence} must {role} at device {expected}, found {actual}")]
    WrongEndpoint {
        sequence: usize,
        role: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("device {device} is covered by {covered} of {expected} chunks")]
    ChunkCoverage {
        device: usize,
        covered: usize,
        expected: usize,
    },
    #[error("plan is for {plan} devices but {requested} were requested")]
    DeviceCountMismatch { plan: usize, requested: usize },
    #[error("no peer link from device {from} to device {to}")]
    NoPeerLink { from: usize, to: usize },
}

/// One path through the devices, carrying `chunks` parts of a slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSequence {
    path: Vec<usize>,
    chunks: usize,
}

impl TransferSequence {
    pub fn new(path: Vec<usize>, chunks: usize) -> Self {
        TransferSequence { path, chunks }
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// First device of the path
    pub fn source(&self) -> Option<usize> {
        self.path.first().copied()
    }

    /// Last device of the path
    pub fn target(&self) -> Option<usize> {
        self.path.last().copied()
    }

    /// Path with waiting steps collapsed: the devices the data lands on
    pub fn route(&self) -> Vec<usize> {
        let mut route = self.path.clone();
        route.dedup();
        route
    }

    /// Device pairs `(from, to)` that exchange data, in path order
    pub fn hops(&self) -> Vec<(usize, usize)> {
        self.route().windows(2).map(|w| (w[0], w[1])).collect()
    }
}

/// Immutable, validated description of a gather or scatter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    kind: PlanKind,
    num_gpus: usize,
    main_gpu: usize,
    num_steps: usize,
    num_chunks: usize,
    sequences: Vec<TransferSequence>,
}

impl TransferPlan {
    pub fn new(
        kind: PlanKind,
        num_gpus: usize,
        main_gpu: usize,
        num_steps: usize,
        num_chunks: usize,
        sequences: Vec<TransferSequence>,
    ) -> Self {
        TransferPlan {
            kind,
            num_gpus,
            main_gpu,
            num_steps,
            num_chunks,
            sequences,
        }
    }

    /// Every device sends its slice straight to `main_gpu` in one step
    pub fn direct_gather(num_gpus: usize, main_gpu: usize) -> Self {
        let sequences = (0..num_gpus)
            .map(|src| TransferSequence::new(vec![src, main_gpu], 1))
            .collect();
        Self::new(PlanKind::Gather, num_gpus, main_gpu, 1, 1, sequences)
    }

    /// `main_gpu` sends every slice straight to its device in one step
    pub fn direct_scatter(num_gpus: usize, main_gpu: usize) -> Self {
        let sequences = (0..num_gpus)
            .map(|dst| TransferSequence::new(vec![main_gpu, dst], 1))
            .collect();
        Self::new(PlanKind::Scatter, num_gpus, main_gpu, 1, 1, sequences)
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn num_gpus(&self) -> usize {
        self.num_gpus
    }

    pub fn main_gpu(&self) -> usize {
        self.main_gpu
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn sequences(&self) -> &[TransferSequence] {
        &self.sequences
    }

    /// Internal consistency, independent of the plan's role
    pub fn valid(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`valid`](Self::valid), naming the first problem found
    pub fn check(&self) -> Result<(), PlanError> {
        if self.num_gpus == 0 {
            return Err(PlanError::NoDevices);
        }
        if self.main_gpu >= self.num_gpus {
            return Err(PlanError::MainGpuOutOfRange {
                main_gpu: self.main_gpu,
                num_gpus: self.num_gpus,
            });
        }
        if self.num_chunks == 0 {
            return Err(PlanError::NoChunks);
        }
        if self.sequences.is_empty() {
            return Err(PlanError::NoSequences);
        }
        let path_len = self
            .num_steps
            .checked_add(1)
            .ok_or(PlanError::TooManySteps {
                num_steps: self.num_steps,
            })?;

        for (index, sequence) in self.sequences.iter().enumerate() {
            if sequence.path.len() != path_len {
                return Err(PlanError::PathLength {
                    sequence: index,
                    expected: path_len,
                    actual: sequence.path.len(),
                });
            }
            if let Some(&device) = sequence.path.iter().find(|&&d| d >= self.num_gpus) {
                return Err(PlanError::DeviceOutOfRange {
                    sequence: index,
                    device,
                    num_gpus: self.num_gpus,
                });
            }
            if sequence.chunks == 0 {
                return Err(PlanError::EmptySequence { sequence: index });
            }
            let route = sequence.route();
            for (position, device) in route.iter().enumerate() {
                if route[..position].contains(device) {
                    return Err(PlanError::RevisitedDevice {
                        sequence: index,
                        device: *device,
                    });
                }
            }
        }
        Ok(())
    }

    /// Role check: every source (gather) or destination (scatter) is
    /// covered by exactly `num_chunks` chunks and every path touches
    /// `main_gpu` at the right end. Runs [`check`](Self::check) first.
    pub fn verify(&self) -> Result<(), PlanError> {
        self.check()?;
        // Keyed by device: num_gpus comes from the plan file and may be huge
        let mut covered: BTreeMap<usize, usize> = BTreeMap::new();
        for (index, sequence) in self.sequences.iter().enumerate() {
            let (role, anchor, owner) = match self.kind {
                PlanKind::Gather => ("end", sequence.target(), sequence.source()),
                PlanKind::Scatter => ("start", sequence.source(), sequence.target()),
            };
            let (Some(anchor), Some(owner)) = (anchor, owner) else {
                return Err(PlanError::PathLength {
                    sequence: index,
                    expected: self.num_steps.saturating_add(1),
                    actual: 0,
                });
            };
            if anchor != self.main_gpu {
                return Err(PlanError::WrongEndpoint {
                    sequence: index,
                    role,
                    expected: self.main_gpu,
                    actual: anchor,
                });
            }
            let count = covered.entry(owner).or_insert(0);
            *count = count.saturating_add(sequence.chunks);
        }

        // At most one device past the covered ones is visited
        match (0..self.num_gpus)
            .map(|device| (device, covered.get(&device).copied().unwrap_or(0)))
            .find(|&(_, count)| count != self.num_chunks)
        {
            Some((device, count)) => Err(PlanError::ChunkCoverage {
                device,
                covered: count,
                expected: self.num_chunks,
            }),
            None => Ok(()),
        }
    }

    /// Everything an engine of `kind` over `num_gpu` devices needs to hold
    pub fn validate_for(&self, kind: PlanKind, num_gpu: usize) -> Result<(), PlanError> {
        self.check()?;
        if self.kind != kind {
            return Err(PlanError::WrongKind {
                expected: kind,
                actual: self.kind,
            });
        }
        if self.num_gpus != num_gpu {
            return Err(PlanError::DeviceCountMismatch {
                plan: self.num_gpus,
                requested: num_gpu,
            });
        }
        self.verify()
    }
}
