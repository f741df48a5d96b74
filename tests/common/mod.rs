//! Common test utilities for transfer engine tests
//!
//! Shared fixtures build contexts, device buffers with recognizable contents
//! and the relay plans used across the gather, scatter and plan suites.

// Submodules
mod fixtures;
mod tempfile_helpers;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use tempfile_helpers::*;

/// Install the test subscriber once; honours `RUST_LOG` and `SPARSE_COMM_LOG_*`
#[allow(dead_code)]
pub fn init_test_logging() {
    sparse_comm::logging::init_logging_default();
}
