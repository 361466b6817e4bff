// crates/core/src/job.rs
//! Job record types persisted as `state.json` in each job directory.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque job identifier; also the name of the job's directory.
pub type JobId = String;

/// Named output files recorded against a job (`name -> path`).
pub type Artifacts = BTreeMap<String, String>;

/// One phase of the pipeline.
///
/// Declaration order is pipeline order, so `Ord` and `Stage::ALL` walk the
/// DAG front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Segmentation,
    Reconstruction,
    Conversion,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Segmentation, Stage::Reconstruction, Stage::Conversion];

    /// The stage whose completion means the whole job is finished.
    pub const TERMINAL: Stage = Stage::Conversion;

    /// Stages that must be `done` before this one may be claimed.
    pub fn prerequisites(self) -> &'static [Stage] {
        match self {
            Stage::Segmentation => &[],
            Stage::Reconstruction => &[Stage::Segmentation],
            Stage::Conversion => &[Stage::Reconstruction],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Segmentation => "segmentation",
            Stage::Reconstruction => "reconstruction",
            Stage::Conversion => "conversion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Per-stage status of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the status sequence a
    /// subsequence of `pending, in_progress, {done | failed}`.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Pending) | (Pending, InProgress) | (Pending, Failed) | (InProgress, Done) | (InProgress, Failed)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            error: None,
        }
    }
}

/// The durable record of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub stages: BTreeMap<Stage, StageRecord>,
    #[serde(default)]
    pub artifacts: Artifacts,
}

impl Job {
    /// A fresh record: every stage pending, no artifacts.
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            stages: Stage::ALL.into_iter().map(|s| (s, StageRecord::pending())).collect(),
            artifacts: Artifacts::new(),
        }
    }

    /// Status of `stage`. A stage missing from a hand-edited record reads
    /// as `pending`.
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages
            .get(&stage)
            .map(|r| r.status)
            .unwrap_or(StageStatus::Pending)
    }

    pub fn error(&self, stage: Stage) -> Option<&str> {
        self.stages.get(&stage).and_then(|r| r.error.as_deref())
    }

    /// True when `stage` is pending and every prerequisite is `done`.
    pub fn is_claimable(&self, stage: Stage, prerequisites: &[Stage]) -> bool {
        self.status(stage) == StageStatus::Pending
            && prerequisites.iter().all(|p| self.status(*p) == StageStatus::Done)
    }

    /// First failed stage in pipeline order, with its message.
    pub fn first_failure(&self) -> Option<(Stage, Option<&str>)> {
        Stage::ALL
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::Failed)
            .map(|s| (s, self.error(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_job_is_blank() {
        let job = Job::new("abc");
        assert_eq!(job.stages.len(), 3);
        assert!(Stage::ALL.iter().all(|s| job.status(*s) == StageStatus::Pending));
        assert!(job.artifacts.is_empty());
    }

    #[test]
    fn test_state_json_shape() {
        let mut job = Job::new("abc");
        job.stages.get_mut(&Stage::Segmentation).unwrap().status = StageStatus::Failed;
        job.stages.get_mut(&Stage::Segmentation).unwrap().error = Some("no object found".into());
        job.artifacts.insert("mask".into(), "/jobs/abc/segmentation/mask_0.png".into());

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "job_id": "abc",
                "stages": {
                    "segmentation": {"status": "failed", "error": "no object found"},
                    "reconstruction": {"status": "pending", "error": null},
                    "conversion": {"status": "pending", "error": null},
                },
                "artifacts": {"mask": "/jobs/abc/segmentation/mask_0.png"},
            })
        );

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use StageStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Done));
        assert!(!InProgress.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Pending));
        for from in [Done, Failed] {
            for to in [Pending, InProgress, Done, Failed] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_prerequisites_form_linear_chain() {
        assert!(Stage::Segmentation.prerequisites().is_empty());
        assert_eq!(Stage::Reconstruction.prerequisites(), &[Stage::Segmentation]);
        assert_eq!(Stage::Conversion.prerequisites(), &[Stage::Reconstruction]);
    }

    #[test]
    fn test_failed_prerequisite_blocks_claim() {
        let mut job = Job::new("abc");
        job.stages.get_mut(&Stage::Segmentation).unwrap().status = StageStatus::Failed;
        assert!(!job.is_claimable(Stage::Reconstruction, Stage::Reconstruction.prerequisites()));
        assert_eq!(job.first_failure(), Some((Stage::Segmentation, None)));
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("conversion".parse::<Stage>().unwrap(), Stage::Conversion);
        assert!("meshing".parse::<Stage>().is_err());
    }
}
