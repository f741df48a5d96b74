//! Expansion of a plan into concrete copies
//!
//! For given per-device counts, every sequence turns into a chain of copies,
//! one per step in which its data changes device. A copy lands either in the
//! caller's destination buffer (when it reaches the path's last device) or
//! in the staging buffer of a relay device. Staging regions are packed per
//! device in sequence order, so the staging requirement of a device is the
//! end of its last region.
//!
//! A device's slice is cut into `num_chunks` balanced parts: part `j` of a
//! slice of `c` elements holds `c / n` elements plus one if `j < c % n`.
//! Sequences starting (gather) or ending (scatter) at the same device take
//! consecutive parts in plan order. Part sizes never grow when `c` shrinks,
//! so staging sized for some counts fits every smaller set of counts.

use super::{PlanKind, TransferPlan};
use crate::error::CommResult;
use crate::precondition;

/// Where a copy reads from or writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Caller source buffer `index` (always 0 for scatter)
    Source { index: usize, offset: usize },
    /// Staging buffer of `device`
    Staging { device: usize, offset: usize },
    /// Caller destination buffer `index` (always 0 for gather)
    Destination { index: usize, offset: usize },
}

/// One device-to-device copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Plan step; 0 for data that never leaves its device
    pub step: usize,
    /// Index of the plan sequence this copy belongs to
    pub sequence: usize,
    pub from_device: usize,
    pub to_device: usize,
    pub src: Endpoint,
    pub dst: Endpoint,
    /// Elements copied
    pub len: usize,
    /// Previous copy of the same sequence, which must finish first
    pub after: Option<usize>,
    /// Whether a later copy of the same sequence reads this one's output
    pub has_successor: bool,
}

impl Transfer {
    /// Logical device whose stream issues the copy
    pub fn stream(&self) -> usize {
        self.from_device
    }
}

/// Ordered copies for one launch plus the staging they need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSchedule {
    transfers: Vec<Transfer>,
    staging_lengths: Vec<usize>,
}

impl TransferSchedule {
    /// Copies ordered by step, then sequence
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Staging elements needed on every device
    pub fn staging_lengths(&self) -> &[usize] {
        &self.staging_lengths
    }

    /// Logical devices whose streams receive work, ascending
    pub fn streams(&self) -> Vec<usize> {
        let mut streams: Vec<usize> = self.transfers.iter().map(Transfer::stream).collect();
        streams.sort_unstable();
        streams.dedup();
        streams
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Offset and length of parts `first..first + count` of a slice of `total`
/// elements cut into `parts` balanced parts
fn part_range(total: usize, parts: usize, first: usize, count: usize) -> (usize, usize) {
    let base = total / parts;
    let extra = total % parts;
    let start = first * base + first.min(extra);
    let end = (first + count) * base + (first + count).min(extra);
    (start, end - start)
}

fn prefix_sums(counts: &[usize]) -> CommResult<Vec<usize>> {
    let mut prefix = Vec::with_capacity(counts.len());
    let mut total = 0usize;
    for &count in counts {
        prefix.push(total);
        total = total
            .checked_add(count)
            .ok_or_else(|| precondition!("send counts overflow"))?;
    }
    Ok(prefix)
}

/// Part of an owner's slice carried by one sequence
#[derive(Debug, Clone, Copy)]
struct SequenceSlice {
    origin: Endpoint,
    settle: Endpoint,
    len: usize,
}

impl TransferPlan {
    /// Expand the plan for `send_counts` (one entry per device)
    pub fn schedule(&self, send_counts: &[usize]) -> CommResult<TransferSchedule> {
        self.verify()?;
        if send_counts.len() != self.num_gpus {
            return Err(precondition!(
                "{} send counts given for a plan over {} devices",
                send_counts.len(),
                self.num_gpus
            ));
        }

        let slices = self.slices(send_counts)?;
        let mut staging_lengths = vec![0usize; self.num_gpus];
        let mut transfers: Vec<Transfer> = Vec::new();

        // Per sequence: where the data sits now and the last copy that moved it
        let mut cursor: Vec<Option<(Endpoint, Option<usize>)>> = slices
            .iter()
            .map(|slice| slice.map(|slice| (slice.origin, None)))
            .collect();

        // Data that never leaves its device is copied before any hop
        for (index, sequence) in self.sequences.iter().enumerate() {
            let Some(slice) = slices[index] else {
                continue;
            };
            if sequence.hops().is_empty() {
                let device = sequence.path[0];
                transfers.push(Transfer {
                    step: 0,
                    sequence: index,
                    from_device: device,
                    to_device: device,
                    src: slice.origin,
                    dst: slice.settle,
                    len: slice.len,
                    after: None,
                    has_successor: false,
                });
                cursor[index] = None;
            }
        }

        for step in 1..=self.num_steps {
            for (index, sequence) in self.sequences.iter().enumerate() {
                let (Some((current, previous)), Some(slice)) = (cursor[index], slices[index]) else {
                    continue;
                };
                let from = sequence.path[step - 1];
                let to = sequence.path[step];
                if from == to {
                    continue;
                }

                let dst = if to == sequence.path[self.num_steps] {
                    slice.settle
                } else {
                    let offset = staging_lengths[to];
                    staging_lengths[to] += slice.len;
                    Endpoint::Staging { device: to, offset }
                };

                if let Some(previous) = previous {
                    transfers[previous].has_successor = true;
                }
                transfers.push(Transfer {
                    step,
                    sequence: index,
                    from_device: from,
                    to_device: to,
                    src: current,
                    dst,
                    len: slice.len,
                    after: previous,
                    has_successor: false,
                });
                cursor[index] = Some((dst, Some(transfers.len() - 1)));
            }
        }

        Ok(TransferSchedule {
            transfers,
            staging_lengths,
        })
    }

    /// Staging elements every device needs to run the plan for `send_counts`
    pub fn calc_buffer_lengths(&self, send_counts: &[usize]) -> CommResult<Vec<usize>> {
        Ok(self.schedule(send_counts)?.staging_lengths)
    }

    /// Where each sequence's data starts and ends; `None` for empty parts
    fn slices(&self, send_counts: &[usize]) -> CommResult<Vec<Option<SequenceSlice>>> {
        let prefix = prefix_sums(send_counts)?;
        let mut next_part = vec![0usize; self.num_gpus];

        let slices: Vec<Option<SequenceSlice>> = self
            .sequences
            .iter()
            .map(|sequence| {
                let owner = match self.kind {
                    PlanKind::Gather => sequence.path[0],
                    PlanKind::Scatter => sequence.path[self.num_steps],
                };
                let (start, len) = part_range(
                    send_counts[owner],
                    self.num_chunks,
                    next_part[owner],
                    sequence.chunks,
                );
                next_part[owner] += sequence.chunks;

                if len == 0 {
                    return None;
                }
                let (origin, settle) = match self.kind {
                    PlanKind::Gather => (
                        Endpoint::Source {
                            index: owner,
                            offset: start,
                        },
                        Endpoint::Destination {
                            index: 0,
                            offset: prefix[owner] + start,
                        },
                    ),
                    PlanKind::Scatter => (
                        Endpoint::Source {
                            index: 0,
                            offset: prefix[owner] + start,
                        },
                        Endpoint::Destination {
                            index: owner,
                            offset: start,
                        },
                    ),
                };
                Some(SequenceSlice {
                    origin,
                    settle,
                    len,
                })
            })
            .collect();
        Ok(slices)
    }
}
