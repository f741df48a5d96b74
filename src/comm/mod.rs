//! Plan-driven gather and scatter engines
//!
//! Both engines own a [`DeviceContext`](crate::context::DeviceContext), a
//! validated [`TransferPlan`](crate::plan::TransferPlan) and the staging
//! buffers the plan needs. `exec_async` enqueues the plan's copies on the
//! device streams and returns; `sync` blocks until they have finished.

mod gather;
mod launch;
mod scatter;

pub use gather::GatherEngine;
pub use scatter::ScatterEngine;

use crate::error::CommResult;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommState {
    /// No copies in flight
    #[default]
    Idle,
    /// Copies enqueued, `sync` not called yet
    Executing,
}

/// Asynchronous collective over a fixed set of buffers
pub trait SparseComm {
    /// Enqueue one round of copies and return without waiting
    fn exec_async(&mut self) -> CommResult<()>;

    /// Wait for the copies of the last `exec_async`; no-op when idle
    fn sync(&mut self) -> CommResult<()>;

    fn state(&self) -> CommState;
}
