//! sparse-comm - plan-driven gather/scatter across accelerators
//!
//! Moves variable-length slices between the devices of a node following a
//! precomputed transfer plan: many-to-one ([`GatherEngine`]) and one-to-many
//! ([`ScatterEngine`]). Copies run asynchronously on per-device streams,
//! optionally relayed through staging buffers on intermediate devices.

#![allow(clippy::too_many_arguments)] // Engine constructors mirror the collective's buffer lists
#![allow(clippy::needless_range_loop)] // Clearer for per-device loops

pub mod backend;
pub mod comm;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod plan;

pub use backend::{DeviceBuffer, Element, StagingBufferSet};
pub use comm::{CommState, GatherEngine, ScatterEngine, SparseComm};
pub use config::{ContextConfig, PeerTopology};
pub use context::DeviceContext;
pub use error::{CommError, CommResult, ErrorCategory};
pub use plan::{PlanError, PlanKind, TransferPlan, TransferSequence};
