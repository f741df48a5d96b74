//! Many-to-one gather engine

use crate::backend::DeviceBuffer;
use crate::comm::launch::{self, Launcher};
use crate::comm::{CommState, SparseComm};
use crate::context::DeviceContext;
use crate::error::CommResult;
use crate::plan::{PlanKind, TransferPlan};
use crate::precondition;

/// Collects the first `send_counts[i]` elements of every `srcs[i]` into
/// `dst` on the main device, device after device.
///
/// After `sync`, `dst[prefix(i)..prefix(i) + send_counts[i]]` equals
/// `srcs[i][..send_counts[i]]`, where `prefix(i)` sums the counts of the
/// devices before `i`.
#[derive(Debug)]
pub struct GatherEngine {
    ctx: DeviceContext,
    plan: TransferPlan,
    srcs: Vec<DeviceBuffer>,
    srcs_lens: Vec<usize>,
    dst: [DeviceBuffer; 1],
    dst_len: usize,
    launcher: Launcher,
}

impl GatherEngine {
    /// Validate the plan and buffers, then allocate staging for
    /// `send_counts`.
    ///
    /// Nothing is allocated if the plan or the buffers are rejected.
    pub fn new(
        ctx: DeviceContext,
        plan: TransferPlan,
        num_gpu: usize,
        srcs: Vec<DeviceBuffer>,
        srcs_lens: Vec<usize>,
        send_counts: Vec<usize>,
        dst: DeviceBuffer,
        dst_len: usize,
    ) -> CommResult<Self> {
        launch::validate_plan(&ctx, &plan, PlanKind::Gather, num_gpu)?;
        launch::check_device_buffers(&ctx, "source", &srcs, &srcs_lens, &send_counts)?;
        launch::check_main_buffer(&ctx, "destination", plan.main_gpu(), &dst, dst_len, &send_counts)?;
        if let Some(device) = srcs.iter().position(|src| src.same_allocation(&dst)) {
            return Err(precondition!(
                "destination buffer aliases source buffer {}",
                device
            ));
        }

        tracing::debug!(
            "GatherEngine::new: {} devices into device {}, counts {:?}",
            num_gpu,
            plan.main_gpu(),
            send_counts
        );
        let launcher = Launcher::new(&ctx, &plan, &send_counts)?;
        ctx.sync_hard()?;

        Ok(GatherEngine {
            ctx,
            plan,
            srcs,
            srcs_lens,
            dst: [dst],
            dst_len,
            launcher,
        })
    }

    /// Gather with the construction-time counts
    pub fn exec_async(&mut self) -> CommResult<()> {
        let counts = self.launcher.send_counts().to_vec();
        self.exec_async_with(&counts)
    }

    /// Gather with smaller per-device counts
    pub fn exec_async_with(&mut self, send_counts: &[usize]) -> CommResult<()> {
        self.launcher
            .launch(&self.ctx, &self.plan, send_counts, &self.srcs, &self.dst)
    }

    /// Block until the last launch has finished
    pub fn sync(&mut self) -> CommResult<()> {
        self.launcher.sync(&self.ctx)
    }

    /// Staging requirement of every device for `send_counts`
    pub fn calc_buffer_lengths(&self, send_counts: &[usize]) -> CommResult<Vec<usize>> {
        self.plan.calc_buffer_lengths(send_counts)
    }

    /// Staging actually allocated, in elements per device
    pub fn staging_lengths(&self) -> &[usize] {
        self.launcher.staging_lengths()
    }

    pub fn send_counts(&self) -> &[usize] {
        self.launcher.send_counts()
    }

    pub fn srcs_lens(&self) -> &[usize] {
        &self.srcs_lens
    }

    pub fn dst_len(&self) -> usize {
        self.dst_len
    }

    pub fn state(&self) -> CommState {
        self.launcher.state()
    }

    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }
}

impl SparseComm for GatherEngine {
    fn exec_async(&mut self) -> CommResult<()> {
        GatherEngine::exec_async(self)
    }

    fn sync(&mut self) -> CommResult<()> {
        GatherEngine::sync(self)
    }

    fn state(&self) -> CommState {
        GatherEngine::state(self)
    }
}
