//! One-to-many scatter engine

use crate::backend::DeviceBuffer;
use crate::comm::launch::{self, Launcher};
use crate::comm::{CommState, SparseComm};
use crate::context::DeviceContext;
use crate::error::CommResult;
use crate::plan::{PlanKind, TransferPlan};
use crate::precondition;

/// Splits `src` on the main device into consecutive slices and delivers
/// slice `i` (of `send_counts[i]` elements) to the front of `dsts[i]`.
#[derive(Debug)]
pub struct ScatterEngine {
    ctx: DeviceContext,
    plan: TransferPlan,
    src: [DeviceBuffer; 1],
    src_len: usize,
    dsts: Vec<DeviceBuffer>,
    dsts_lens: Vec<usize>,
    launcher: Launcher,
}

impl ScatterEngine {
    /// Validate the plan and buffers, then allocate staging for
    /// `send_counts`.
    pub fn new(
        ctx: DeviceContext,
        plan: TransferPlan,
        num_gpu: usize,
        src: DeviceBuffer,
        src_len: usize,
        send_counts: Vec<usize>,
        dsts: Vec<DeviceBuffer>,
        dsts_lens: Vec<usize>,
    ) -> CommResult<Self> {
        launch::validate_plan(&ctx, &plan, PlanKind::Scatter, num_gpu)?;
        launch::check_device_buffers(&ctx, "destination", &dsts, &dsts_lens, &send_counts)?;
        launch::check_main_buffer(&ctx, "source", plan.main_gpu(), &src, src_len, &send_counts)?;
        if let Some(device) = dsts.iter().position(|dst| dst.same_allocation(&src)) {
            return Err(precondition!(
                "destination buffer {} aliases the source buffer",
                device
            ));
        }

        tracing::debug!(
            "ScatterEngine::new: device {} to {} devices, counts {:?}",
            plan.main_gpu(),
            num_gpu,
            send_counts
        );
        let launcher = Launcher::new(&ctx, &plan, &send_counts)?;
        ctx.sync_hard()?;

        Ok(ScatterEngine {
            ctx,
            plan,
            src: [src],
            src_len,
            dsts,
            dsts_lens,
            launcher,
        })
    }

    /// Scatter with the construction-time counts
    pub fn exec_async(&mut self) -> CommResult<()> {
        let counts = self.launcher.send_counts().to_vec();
        self.exec_async_with(&counts)
    }

    /// Scatter with smaller per-device counts; slices are re-packed from
    /// the start of the source
    pub fn exec_async_with(&mut self, send_counts: &[usize]) -> CommResult<()> {
        self.launcher
            .launch(&self.ctx, &self.plan, send_counts, &self.src, &self.dsts)
    }

    pub fn sync(&mut self) -> CommResult<()> {
        self.launcher.sync(&self.ctx)
    }

    pub fn calc_buffer_lengths(&self, send_counts: &[usize]) -> CommResult<Vec<usize>> {
        self.plan.calc_buffer_lengths(send_counts)
    }

    pub fn staging_lengths(&self) -> &[usize] {
        self.launcher.staging_lengths()
    }

    pub fn send_counts(&self) -> &[usize] {
        self.launcher.send_counts()
    }

    pub fn src_len(&self) -> usize {
        self.src_len
    }

    pub fn dsts_lens(&self) -> &[usize] {
        &self.dsts_lens
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

impl SparseComm for ScatterEngine {
    fn exec_async(&mut self) -> CommResult<()> {
        ScatterEngine::exec_async(self)
    }

    fn sync(&mut self) -> CommResult<()> {
        ScatterEngine::sync(self)
    }

    fn state(&self) -> CommState {
        ScatterEngine::state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommError;

    #[test]
    fn test_two_device_scatter() {
        let ctx = DeviceContext::new(2).unwrap();
        let src = ctx.allocate(0, 4).unwrap();
        src.copy_from_host(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let dsts = vec![ctx.allocate(0, 2).unwrap(), ctx.allocate(1, 2).unwrap()];

        let mut engine = ScatterEngine::new(
            ctx,
            TransferPlan::direct_scatter(2, 0),
            2,
            src,
            4,
            vec![2, 2],
            dsts.clone(),
            vec![2, 2],
        )
        .unwrap();
        engine.exec_async().unwrap();
        engine.sync().unwrap();

        assert_eq!(dsts[0].to_host_vec().unwrap(), vec![1.0, 2.0]);
        assert_eq!(dsts[1].to_host_vec().unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_gather_plan_rejected() {
        let ctx = DeviceContext::new(2).unwrap();
        let src = ctx.allocate(0, 2).unwrap();
        let dsts = vec![ctx.allocate(0, 1).unwrap(), ctx.allocate(1, 1).unwrap()];
        let err = ScatterEngine::new(
            ctx,
            TransferPlan::direct_gather(2, 0),
            2,
            src,
            2,
            vec![1, 1],
            dsts,
            vec![1, 1],
        )
        .unwrap_err();
        assert!(matches!(err, CommError::PlanInvalid(_)));
    }

    #[test]
    fn test_source_too_short_rejected() {
        let ctx = DeviceContext::new(2).unwrap();
        let src = ctx.allocate(0, 3).unwrap();
        let dsts = vec![ctx.allocate(0, 2).unwrap(), ctx.allocate(1, 2).unwrap()];
        let err = ScatterEngine::new(
            ctx,
            TransferPlan::direct_scatter(2, 0),
            2,
            src,
            3,
            vec![2, 2],
            dsts,
            vec![2, 2],
        )
        .unwrap_err();
        assert!(matches!(err, CommError::PreconditionViolation(_)));
    }

    #[test]
    fn test_sync_when_idle_is_noop() {
        let ctx = DeviceContext::new(1).unwrap();
        let src = ctx.allocate(0, 1).unwrap();
        let dsts = vec![ctx.allocate(0, 1).unwrap()];
        let mut engine = ScatterEngine::new(
            ctx,
            TransferPlan::direct_scatter(1, 0),
            1,
            src,
            1,
            vec![1],
            dsts,
            vec![1],
        )
        .unwrap();
        engine.sync().unwrap();
        assert_eq!(engine.state(), CommState::Idle);
    }
}
