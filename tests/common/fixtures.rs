//! Buffer and plan fixtures

#![allow(dead_code)]

use sparse_comm::{
    ContextConfig, DeviceBuffer, DeviceContext, PeerTopology, PlanKind, TransferPlan,
    TransferSequence,
};

/// Recognizable contents for device `device`: `device * 1000 + i`
pub fn pattern(device: usize, len: usize) -> Vec<f32> {
    (0..len).map(|i| (device * 1000 + i) as f32).collect()
}

/// Allocate a buffer on `device` and upload `data`
pub fn upload(ctx: &DeviceContext, device: usize, data: &[f32]) -> anyhow::Result<DeviceBuffer> {
    let buffer = ctx.allocate(device, data.len())?;
    buffer.copy_from_host(data)?;
    Ok(buffer)
}

/// Allocate a buffer on `device` filled with `value`
pub fn filled(
    ctx: &DeviceContext,
    device: usize,
    len: usize,
    value: f32,
) -> anyhow::Result<DeviceBuffer> {
    upload(ctx, device, &vec![value; len])
}

/// Context whose devices only reach their neighbours: 0 - 1 - ... - n-1
pub fn chain_context(num_gpu: usize) -> anyhow::Result<DeviceContext> {
    Ok(DeviceContext::with_config(
        &ContextConfig::new(num_gpu).with_topology(PeerTopology::chain(num_gpu)),
    )?)
}

/// Gather over a chain into device 0: device `d` hops `d -> d-1 -> ... -> 0`,
/// waiting on its own device until its turn to move.
pub fn chain_gather_plan(num_gpu: usize) -> TransferPlan {
    let num_steps = num_gpu.saturating_sub(1).max(1);
    let sequences = (0..num_gpu)
        .map(|device| {
            let path = (0..=num_steps)
                .map(|step| device.saturating_sub(step))
                .collect();
            TransferSequence::new(path, 1)
        })
        .collect();
    TransferPlan::new(PlanKind::Gather, num_gpu, 0, num_steps, 1, sequences)
}

/// Scatter over a chain from device 0: the reverse of [`chain_gather_plan`]
pub fn chain_scatter_plan(num_gpu: usize) -> TransferPlan {
    let num_steps = num_gpu.saturating_sub(1).max(1);
    let sequences = (0..num_gpu)
        .map(|device| {
            let path = (0..=num_steps)
                .map(|step| step.min(device))
                .collect();
            TransferSequence::new(path, 1)
        })
        .collect();
    TransferPlan::new(PlanKind::Scatter, num_gpu, 0, num_steps, 1, sequences)
}

/// Sum of counts of devices before `device`
pub fn prefix(counts: &[usize], device: usize) -> usize {
    counts[..device].iter().sum()
}
