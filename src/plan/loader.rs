//! Plan files
//!
//! Plans are stored as JSON:
//!
//! ```json
//! {
//!   "type": "gather",
//!   "num_gpus": 3,
//!   "main_gpu": 0,
//!   "num_steps": 2,
//!   "num_chunks": 1,
//!   "plan": [[0, 0, 0], [1, 0, 0], [2, 1, 0]],
//!   "chunks": [1, 1, 1]
//! }
//! ```
//!
//! `chunks`, `num_chunks` and `num_steps` may be omitted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{PlanKind, TransferPlan, TransferSequence};
use crate::error::{CommError, CommResult};

#[derive(Debug, Serialize, Deserialize)]
struct PlanFile {
    #[serde(rename = "type")]
    kind: PlanKind,
    num_gpus: usize,
    main_gpu: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_steps: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_chunks: Option<usize>,
    plan: Vec<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<usize>>,
}

impl PlanFile {
    fn into_plan(self) -> CommResult<TransferPlan> {
        let num_steps = match self.num_steps {
            Some(steps) => steps,
            None => self
                .plan
                .first()
                .map(|path| path.len().saturating_sub(1))
                .unwrap_or(0),
        };

        let chunks = match self.chunks {
            Some(chunks) if chunks.len() != self.plan.len() => {
                return Err(CommError::PlanParse(format!(
                    "{} chunk counts given for {} sequences",
                    chunks.len(),
                    self.plan.len()
                )));
            }
            Some(chunks) => chunks,
            None => vec![1; self.plan.len()],
        };

        let sequences = self
            .plan
            .into_iter()
            .zip(chunks)
            .map(|(path, chunks)| TransferSequence::new(path, chunks))
            .collect();

        let plan = TransferPlan::new(
            self.kind,
            self.num_gpus,
            self.main_gpu,
            num_steps,
            self.num_chunks.unwrap_or(1),
            sequences,
        );
        plan.check()?;
        Ok(plan)
    }
}

impl From<&TransferPlan> for PlanFile {
    fn from(plan: &TransferPlan) -> Self {
        PlanFile {
            kind: plan.kind,
            num_gpus: plan.num_gpus,
            main_gpu: plan.main_gpu,
            num_steps: Some(plan.num_steps),
            num_chunks: Some(plan.num_chunks),
            plan: plan.sequences.iter().map(|s| s.path.clone()).collect(),
            chunks: Some(plan.sequences.iter().map(|s| s.chunks).collect()),
        }
    }
}

impl TransferPlan {
    /// Parse a plan from its JSON text
    pub fn from_json_str(json: &str) -> CommResult<Self> {
        let file: PlanFile =
            serde_json::from_str(json).map_err(|e| CommError::PlanParse(e.to_string()))?;
        file.into_plan()
    }

    /// Read and parse a plan file
    pub fn from_file(path: impl AsRef<Path>) -> CommResult<Self> {
        let path = path.as_ref();
        tracing::debug!("TransferPlan::from_file: loading {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to the plan-file format
    pub fn to_json_string(&self) -> CommResult<String> {
        serde_json::to_string_pretty(&PlanFile::from(self))
            .map_err(|e| CommError::PlanParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanError;

    #[test]
    fn test_parse_full_plan() {
        let plan = TransferPlan::from_json_str(
            r#"{
                "type": "gather",
                "num_gpus": 3,
                "main_gpu": 0,
                "num_steps": 2,
                "num_chunks": 1,
                "plan": [[0, 0, 0], [1, 0, 0], [2, 1, 0]],
                "chunks": [1, 1, 1]
            }"#,
        )
        .unwrap();
        assert_eq!(plan.kind(), PlanKind::Gather);
        assert_eq!(plan.num_steps(), 2);
        assert_eq!(plan.sequences()[2].path(), &[2, 1, 0]);
        assert!(plan.verify().is_ok());
    }

    #[test]
    fn test_parse_applies_defaults() {
        let plan = TransferPlan::from_json_str(
            r#"{"type": "scatter", "num_gpus": 2, "main_gpu": 1, "plan": [[1, 0], [1, 1]]}"#,
        )
        .unwrap();
        assert_eq!(plan.kind(), PlanKind::Scatter);
        assert_eq!(plan.num_steps(), 1);
        assert_eq!(plan.num_chunks(), 1);
        assert!(plan.sequences().iter().all(|s| s.chunks() == 1));
    }

    #[test]
    fn test_parse_errors() {
        let err = TransferPlan::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, CommError::PlanParse(_)));

        let err = TransferPlan::from_json_str(
            r#"{"type": "broadcast", "num_gpus": 1, "main_gpu": 0, "plan": [[0, 0]]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CommError::PlanParse(_)));

        let err = TransferPlan::from_json_str(
            r#"{"type": "gather", "num_gpus": 2, "main_gpu": 0, "plan": [[0, 0], [1, 0]], "chunks": [1]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CommError::PlanParse(_)));
    }

    #[test]
    fn test_parsed_plan_is_checked() {
        let err = TransferPlan::from_json_str(
            r#"{"type": "gather", "num_gpus": 2, "main_gpu": 0, "plan": [[0, 0], [5, 0]]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CommError::PlanInvalid(PlanError::DeviceOutOfRange { device: 5, .. })
        ));
    }

    #[test]
    fn test_parsed_plan_with_overflowing_steps() {
        let err = TransferPlan::from_json_str(
            r#"{"type": "gather", "num_gpus": 1, "main_gpu": 0, "num_steps": 18446744073709551615, "plan": [[0]]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CommError::PlanInvalid(PlanError::TooManySteps { .. })
        ));
    }

    #[test]
    fn test_parsed_plan_with_huge_device_count() {
        let plan = TransferPlan::from_json_str(
            r#"{"type": "gather", "num_gpus": 4611686018427387904, "main_gpu": 0, "plan": [[0, 0]]}"#,
        )
        .unwrap();
        let err = CommError::from(plan.validate_for(PlanKind::Gather, 2).unwrap_err());
        assert!(matches!(
            err,
            CommError::PlanInvalid(PlanError::DeviceCountMismatch { requested: 2, .. })
        ));
        assert!(plan.calc_buffer_lengths(&[1, 1]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let plan = TransferPlan::direct_scatter(3, 2);
        let json = plan.to_json_string().unwrap();
        assert_eq!(TransferPlan::from_json_str(&json).unwrap(), plan);
    }
}
