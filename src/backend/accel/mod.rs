//! Accelerator device backend
//!
//! Models N devices with independent in-order execution streams. Every
//! device owns a bounded memory pool; buffers live in that pool and move
//! between devices only through copies enqueued on a stream.

mod device;
mod error;
mod event;
mod memory;
mod stream;

pub use device::Device;
pub use error::{DeviceError, DeviceResult};
pub use event::DeviceEvent;
pub use memory::{DeviceBuffer, Element};
pub use stream::DeviceStream;
