// crates/core/src/claim.rs
//! Atomic stage claiming across independent pollers.

use crate::error::StoreError;
use crate::job::{JobId, Stage, StageRecord, StageStatus};
use crate::store::JobStore;

impl JobStore {
    /// Claim the first job (ascending id) whose `stage` is pending and whose
    /// `prerequisites` are all `done`, flipping it to `in_progress`.
    ///
    /// Eligibility is re-checked under the job lock, so of several pollers
    /// racing for the same job exactly one wins and the others keep
    /// scanning. Unreadable or corrupt records are logged and skipped.
    /// Only a failure to list the jobs root is returned as an error.
    pub fn claim_next(
        &self,
        stage: Stage,
        prerequisites: &[Stage],
    ) -> Result<Option<JobId>, StoreError> {
        for job_id in self.list_jobs()? {
            // Cheap unlocked filter first; most jobs are not eligible.
            match self.load(&job_id) {
                Ok(job) if job.is_claimable(stage, prerequisites) => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, %stage, error = %e, "Skipping unreadable job during claim scan");
                    continue;
                }
            }

            let claimed = self.modify(&job_id, |job| {
                if !job.is_claimable(stage, prerequisites) {
                    return Ok(false);
                }
                let record = job.stages.entry(stage).or_insert_with(StageRecord::pending);
                record.status = StageStatus::InProgress;
                record.error = None;
                Ok(true)
            });

            match claimed {
                Ok(true) => {
                    tracing::info!(job_id = %job_id, %stage, "Claimed job");
                    metrics::counter!("meshline_stage_claims_total", "stage" => stage.as_str())
                        .increment(1);
                    return Ok(Some(job_id));
                }
                Ok(false) => {
                    tracing::debug!(job_id = %job_id, %stage, "Lost claim race");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, %stage, error = %e, "Skipping job after failed claim attempt");
                }
            }
        }
        Ok(None)
    }

    /// [`JobStore::claim_next`] with the stage's own prerequisites.
    pub fn claim_next_for(&self, stage: Stage) -> Result<Option<JobId>, StoreError> {
        self.claim_next(stage, stage.prerequisites())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, JobStore) {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_claim_then_downstream_becomes_eligible() {
        let (_tmp, store) = test_store();
        let x = store.create_job().unwrap();

        assert_eq!(store.claim_next(Stage::Segmentation, &[]).unwrap(), Some(x.clone()));
        // Reconstruction must wait for segmentation to be done.
        assert_eq!(
            store.claim_next(Stage::Reconstruction, &[Stage::Segmentation]).unwrap(),
            None
        );

        store
            .set_stage_status(&x, Stage::Segmentation, StageStatus::Done, None)
            .unwrap();
        assert_eq!(
            store.claim_next(Stage::Reconstruction, &[Stage::Segmentation]).unwrap(),
            Some(x.clone())
        );
        assert_eq!(
            store.load(&x).unwrap().status(Stage::Reconstruction),
            StageStatus::InProgress
        );
    }

    #[test]
    fn test_failed_prerequisite_stalls_downstream() {
        let (_tmp, store) = test_store();
        let y = store.create_job().unwrap();

        assert_eq!(store.claim_next_for(Stage::Segmentation).unwrap(), Some(y.clone()));
        store
            .set_stage_status(&y, Stage::Segmentation, StageStatus::Failed, Some("no object found".into()))
            .unwrap();

        for _ in 0..3 {
            assert_eq!(store.claim_next_for(Stage::Reconstruction).unwrap(), None);
        }
        let job = store.load(&y).unwrap();
        assert_eq!(job.status(Stage::Segmentation), StageStatus::Failed);
        assert_eq!(job.error(Stage::Segmentation), Some("no object found"));
        assert_eq!(job.status(Stage::Reconstruction), StageStatus::Pending);
    }

    #[test]
    fn test_claims_in_ascending_id_order() {
        let (_tmp, store) = test_store();
        for id in ["job-b", "job-c", "job-a"] {
            store.create_job_named(id, |_| Ok(())).unwrap();
        }
        let order: Vec<_> = std::iter::from_fn(|| store.claim_next_for(Stage::Segmentation).unwrap()).collect();
        assert_eq!(order, vec!["job-a", "job-b", "job-c"]);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let (_tmp, store) = test_store();
        let dir = store.root().join("aaa-corrupt");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(crate::store::STATE_FILE), b"{\"job_id\":").unwrap();
        store.create_job_named("zzz-good", |_| Ok(())).unwrap();

        assert_eq!(
            store.claim_next_for(Stage::Segmentation).unwrap(),
            Some("zzz-good".to_string())
        );
    }

    #[test]
    fn test_uninitialized_directory_is_ignored() {
        let (_tmp, store) = test_store();
        fs::create_dir(store.root().join("initializing")).unwrap();
        assert_eq!(store.claim_next_for(Stage::Segmentation).unwrap(), None);
    }

    #[test]
    fn test_concurrent_pollers_claim_each_job_once() {
        let (_tmp, store) = test_store();
        let jobs: BTreeSet<_> = (0..5).map(|_| store.create_job().unwrap()).collect();

        let pollers = 8;
        let barrier = Arc::new(Barrier::new(pollers));
        let handles: Vec<_> = (0..pollers)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut mine = Vec::new();
                    while let Some(id) = store.claim_next_for(Stage::Segmentation).unwrap() {
                        mine.push(id);
                    }
                    mine
                })
            })
            .collect();

        let mut claimed: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        claimed.sort();
        let unique: BTreeSet<_> = claimed.iter().cloned().collect();

        assert_eq!(claimed.len(), jobs.len(), "a job was claimed twice");
        assert_eq!(unique, jobs);
        for id in &jobs {
            assert_eq!(
                store.load(id).unwrap().status(Stage::Segmentation),
                StageStatus::InProgress
            );
        }
    }
}
