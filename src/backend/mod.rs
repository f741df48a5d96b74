//! Device backend module

pub mod accel;
pub mod staging;

pub use accel::*;
pub use staging::*;
