//! Shared launch path for gather and scatter engines

use crate::backend::{DeviceBuffer, DeviceEvent, StagingBufferSet};
use crate::comm::CommState;
use crate::context::DeviceContext;
use crate::error::{CommError, CommResult};
use crate::plan::{Endpoint, PlanError, PlanKind, TransferPlan, TransferSchedule};
use crate::precondition;

/// Check `plan` against the engine kind, device count and peer links.
///
/// Runs before an engine allocates anything.
pub(crate) fn validate_plan(
    ctx: &DeviceContext,
    plan: &TransferPlan,
    kind: PlanKind,
    num_gpu: usize,
) -> CommResult<()> {
    plan.validate_for(kind, num_gpu)?;

    if ctx.num_devices() != num_gpu {
        return Err(CommError::InvalidConfiguration(format!(
            "context has {} devices, engine asked for {}",
            ctx.num_devices(),
            num_gpu
        )));
    }

    for sequence in plan.sequences() {
        if let Some(&(from, to)) = sequence
            .hops()
            .iter()
            .find(|&&(from, to)| !ctx.can_access_peer(from, to))
        {
            return Err(PlanError::NoPeerLink { from, to }.into());
        }
    }
    Ok(())
}

/// Check a buffer list: one per device, each on its device, each long enough
pub(crate) fn check_device_buffers(
    ctx: &DeviceContext,
    role: &str,
    buffers: &[DeviceBuffer],
    lens: &[usize],
    counts: &[usize],
) -> CommResult<()> {
    let num_gpu = ctx.num_devices();
    if buffers.len() != num_gpu || lens.len() != num_gpu || counts.len() != num_gpu {
        return Err(precondition!(
            "expected {} {} buffers, lengths and send counts, got {}, {} and {}",
            num_gpu,
            role,
            buffers.len(),
            lens.len(),
            counts.len()
        ));
    }

    for (device, ((buffer, &len), &count)) in buffers.iter().zip(lens).zip(counts).enumerate() {
        if !ctx.owns(device, buffer) {
            return Err(precondition!(
                "{} buffer {} does not live on logical device {}",
                role,
                device,
                device
            ));
        }
        if count > len || len > buffer.len() {
            return Err(precondition!(
                "{} buffer {}: send count {} <= length {} <= capacity {} does not hold",
                role,
                device,
                count,
                len,
                buffer.len()
            ));
        }
    }
    Ok(())
}

/// Check the single buffer on the main device against the total volume
pub(crate) fn check_main_buffer(
    ctx: &DeviceContext,
    role: &str,
    main_gpu: usize,
    buffer: &DeviceBuffer,
    len: usize,
    counts: &[usize],
) -> CommResult<()> {
    if !ctx.owns(main_gpu, buffer) {
        return Err(precondition!(
            "{} buffer does not live on main device {}",
            role,
            main_gpu
        ));
    }
    let total = counts
        .iter()
        .try_fold(0usize, |sum, &count| sum.checked_add(count))
        .ok_or_else(|| precondition!("send counts overflow"))?;
    if total > len || len > buffer.len() {
        return Err(precondition!(
            "{} buffer: total {} <= length {} <= capacity {} does not hold",
            role,
            total,
            len,
            buffer.len()
        ));
    }
    Ok(())
}

/// Staging, events and state of one engine
#[derive(Debug)]
pub(crate) struct Launcher {
    staging: StagingBufferSet,
    /// Counts the staging was sized for; later launches may not exceed them
    send_counts: Vec<usize>,
    /// One event per copy of the construction-time schedule
    hop_events: Vec<DeviceEvent>,
    /// One completion event per device
    done_events: Vec<DeviceEvent>,
    /// Devices that received work in the last launch
    touched: Vec<usize>,
    state: CommState,
}

impl Launcher {
    /// Allocate staging for `send_counts` and the events the schedule needs
    pub(crate) fn new(
        ctx: &DeviceContext,
        plan: &TransferPlan,
        send_counts: &[usize],
    ) -> CommResult<Self> {
        let schedule = plan.schedule(send_counts)?;
        tracing::info!(
            "Required staging buffer lengths: {:?}",
            schedule.staging_lengths()
        );
        let staging = StagingBufferSet::allocate(ctx, schedule.staging_lengths())?;

        Ok(Launcher {
            staging,
            send_counts: send_counts.to_vec(),
            hop_events: (0..schedule.transfers().len())
                .map(|_| DeviceEvent::new())
                .collect(),
            done_events: (0..ctx.num_devices()).map(|_| DeviceEvent::new()).collect(),
            touched: Vec::new(),
            state: CommState::Idle,
        })
    }

    pub(crate) fn state(&self) -> CommState {
        self.state
    }

    pub(crate) fn staging_lengths(&self) -> &[usize] {
        self.staging.lengths()
    }

    pub(crate) fn send_counts(&self) -> &[usize] {
        &self.send_counts
    }

    /// Enqueue every copy of `plan` for `counts`.
    ///
    /// `sources` and `destinations` are indexed by the endpoint indices of
    /// the schedule.
    pub(crate) fn launch(
        &mut self,
        ctx: &DeviceContext,
        plan: &TransferPlan,
        counts: &[usize],
        sources: &[DeviceBuffer],
        destinations: &[DeviceBuffer],
    ) -> CommResult<()> {
        if self.state == CommState::Executing {
            return Err(precondition!(
                "exec_async called while the previous launch is still executing; call sync first"
            ));
        }
        if counts.len() != self.send_counts.len() {
            return Err(precondition!(
                "{} send counts given, engine has {} devices",
                counts.len(),
                self.send_counts.len()
            ));
        }
        if let Some((device, (&count, &limit))) = counts
            .iter()
            .zip(&self.send_counts)
            .enumerate()
            .find(|(_, (count, limit))| count > limit)
        {
            return Err(precondition!(
                "send count {} of device {} exceeds the {} the engine was built for",
                count,
                device,
                limit
            ));
        }

        let schedule = plan.schedule(counts)?;
        self.staging.validate_invariants(schedule.staging_lengths())?;
        while self.hop_events.len() < schedule.transfers().len() {
            self.hop_events.push(DeviceEvent::new());
        }

        tracing::debug!(
            "Launcher::launch: {} copies on {} streams",
            schedule.transfers().len(),
            schedule.streams().len()
        );

        self.touched.clear();
        let result = self.enqueue_all(ctx, &schedule, sources, destinations);
        // Copies that made it onto a stream still need a sync
        if result.is_ok() || !self.touched.is_empty() {
            self.state = CommState::Executing;
        }
        result
    }

    fn enqueue_all(
        &mut self,
        ctx: &DeviceContext,
        schedule: &TransferSchedule,
        sources: &[DeviceBuffer],
        destinations: &[DeviceBuffer],
    ) -> CommResult<()> {
        for (index, transfer) in schedule.transfers().iter().enumerate() {
            let stream = ctx.stream(transfer.stream())?;
            if !self.touched.contains(&transfer.stream()) {
                self.touched.push(transfer.stream());
            }

            if let Some(previous) = transfer.after {
                stream.wait_event(&self.hop_events[previous])?;
            }

            let (src, src_offset) = self.resolve(transfer.src, sources, destinations)?;
            let (dst, dst_offset) = self.resolve(transfer.dst, sources, destinations)?;
            DeviceBuffer::copy_async(dst, dst_offset, src, src_offset, transfer.len, stream)?;

            if transfer.has_successor {
                self.hop_events[index].record(stream)?;
            }
        }

        for &device in &self.touched {
            self.done_events[device].record(ctx.stream(device)?)?;
        }
        Ok(())
    }

    fn resolve<'a>(
        &'a self,
        endpoint: Endpoint,
        sources: &'a [DeviceBuffer],
        destinations: &'a [DeviceBuffer],
    ) -> CommResult<(&'a DeviceBuffer, usize)> {
        let (buffer, offset) = match endpoint {
            Endpoint::Source { index, offset } => (sources.get(index), offset),
            Endpoint::Destination { index, offset } => (destinations.get(index), offset),
            Endpoint::Staging { device, offset } => (self.staging.buffer(device), offset),
        };
        buffer
            .map(|buffer| (buffer, offset))
            .ok_or_else(|| precondition!("copy endpoint {:?} has no buffer", endpoint))
    }

    /// Wait for the last launch. Idempotent; no-op when idle.
    pub(crate) fn sync(&mut self, ctx: &DeviceContext) -> CommResult<()> {
        if self.state == CommState::Idle {
            return Ok(());
        }

        let mut result = Ok(());
        for &device in &self.touched {
            if let Err(e) = self.wait_device(ctx, device) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        tracing::debug!("Launcher::sync: {} streams drained", self.touched.len());
        self.touched.clear();
        self.state = CommState::Idle;
        result
    }

    fn wait_device(&self, ctx: &DeviceContext, device: usize) -> CommResult<()> {
        self.done_events[device].synchronize()?;
        // Surfaces faults of commands that already ran
        ctx.stream(device)?.synchronize()?;
        Ok(())
    }
}
