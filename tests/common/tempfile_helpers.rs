//! Helper functions for plan files in temporary directories

use anyhow::Context;
use std::io::Write;

use sparse_comm::TransferPlan;

/// Write `json` to a fresh temp file with a `.json` suffix.
pub fn write_plan_json(json: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::with_suffix(".json")
        .context("Failed to create temporary plan file")?;
    file.write_all(json.as_bytes())
        .context("Failed to write temporary plan file")?;
    file.flush()?;
    Ok(file)
}

/// Serialize `plan` into a fresh temp file.
#[allow(dead_code)]
pub fn write_plan_file(plan: &TransferPlan) -> anyhow::Result<tempfile::NamedTempFile> {
    let json = plan.to_json_string().context("Failed to serialize plan")?;
    write_plan_json(&json)
}

/// Create a temp directory with a helpful error message.
#[allow(dead_code)]
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}
