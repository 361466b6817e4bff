// crates/core/src/store.rs
//! File-backed job store.
//!
//! Each job lives in `<root>/<job_id>/` with its record in `state.json`.
//! The directory tree is the only synchronization medium shared by the
//! gateway and the worker processes, so:
//!
//! - every write goes to a temp file in the job directory and is renamed
//!   over `state.json`, so readers see either the old or the new record;
//! - every load-modify-store sequence holds an exclusive `flock(2)` on
//!   `<job_dir>/state.lock` for its whole duration.
//!
//! All methods are blocking. Async callers go through [`JobStore::blocking`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::job::{Artifacts, Job, JobId, Stage, StageRecord, StageStatus};

pub const STATE_FILE: &str = "state.json";
pub const LOCK_FILE: &str = "state.lock";

#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run blocking store work on tokio's blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(JobStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Directory of `job_id`. Ids outside `[A-Za-z0-9_-]+` never name a job.
    pub fn job_dir(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_job_id(job_id) {
            return Err(StoreError::not_found(job_id));
        }
        Ok(self.root.join(job_id))
    }

    pub fn create_job(&self) -> Result<JobId, StoreError> {
        self.create_job_with(|_| Ok(()))
    }

    /// Create a job, letting `seed` place input files in its directory
    /// before the record is written.
    ///
    /// Pollers ignore directories without `state.json`, so a job becomes
    /// claimable only once its inputs are in place.
    pub fn create_job_with<F>(&self, seed: F) -> Result<JobId, StoreError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.create_job_named(&job_id, seed)?;
        Ok(job_id)
    }

    pub(crate) fn create_job_named<F>(&self, job_id: &str, seed: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let dir = self.job_dir(job_id)?;
        // `create_dir` (not `_all`) so an id collision surfaces as AlreadyExists.
        fs::create_dir(&dir).map_err(|e| StoreError::io(job_id, &dir, e))?;

        let seeded = seed(&dir)
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })
            .and_then(|()| write_record(&dir, &Job::new(job_id)));

        if let Err(e) = seeded {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                tracing::warn!(job_id, error = %cleanup, "Failed to clean up half-created job");
            }
            return Err(e);
        }

        tracing::debug!(job_id, "Created job");
        Ok(())
    }

    /// Read the current record without taking the job lock.
    ///
    /// Safe because writers only ever rename complete files into place.
    pub fn load(&self, job_id: &str) -> Result<Job, StoreError> {
        let dir = self.job_dir(job_id)?;
        read_record(&dir, job_id)
    }

    /// Replace the full record under the job lock.
    ///
    /// The new record must be reachable from the stored one: every stage
    /// keeps or advances its status, and every stored artifact name is
    /// still present.
    pub fn update(&self, job_id: &str, job: &Job) -> Result<(), StoreError> {
        if job.job_id != job_id {
            return Err(StoreError::Corrupt {
                job_id: job_id.to_string(),
                message: format!("record belongs to job {}", job.job_id),
            });
        }
        let dir = self.job_dir(job_id)?;
        let _guard = lock_job(&dir, job_id)?;
        // The record must already exist; `update` never creates jobs.
        let current = read_record(&dir, job_id)?;
        check_successor(&current, job)?;
        write_record(&dir, job)
    }

    /// Locked load-modify-store. Nothing is written if `f` fails.
    pub fn modify<T, F>(&self, job_id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<T, StoreError>,
    {
        let dir = self.job_dir(job_id)?;
        let _guard = lock_job(&dir, job_id)?;
        let mut job = read_record(&dir, job_id)?;
        let out = f(&mut job)?;
        write_record(&dir, &job)?;
        Ok(out)
    }

    /// Move `stage` to `status`. `error` is kept only for `failed`.
    pub fn set_stage_status(
        &self,
        job_id: &str,
        stage: Stage,
        status: StageStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.modify(job_id, |job| {
            let record = job.stages.entry(stage).or_insert_with(StageRecord::pending);
            if !record.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    stage,
                    from: record.status,
                    to: status,
                });
            }
            record.status = status;
            record.error = if status == StageStatus::Failed { error } else { None };
            Ok(())
        })?;
        tracing::debug!(job_id, %stage, %status, "Stage status updated");
        Ok(())
    }

    /// Merge `artifacts` into the job's map; same-named entries are overwritten.
    pub fn set_artifacts(&self, job_id: &str, artifacts: &Artifacts) -> Result<(), StoreError> {
        if artifacts.is_empty() {
            return Ok(());
        }
        self.modify(job_id, |job| {
            job.artifacts
                .extend(artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    /// Ids of every initialized job, ascending.
    pub fn list_jobs(&self) -> Result<Vec<JobId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_valid_job_id(&name) {
                continue;
            }
            if entry.path().join(STATE_FILE).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn check_successor(current: &Job, next: &Job) -> Result<(), StoreError> {
    for stage in Stage::ALL {
        let (from, to) = (current.status(stage), next.status(stage));
        if from != to && !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { stage, from, to });
        }
    }
    if let Some(name) = current.artifacts.keys().find(|k| !next.artifacts.contains_key(*k)) {
        return Err(StoreError::ArtifactRemoved {
            job_id: current.job_id.clone(),
            name: name.clone(),
        });
    }
    Ok(())
}

fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Exclusive advisory lock on the job, released when the guard drops.
fn lock_job(dir: &Path, job_id: &str) -> Result<Flock<File>, StoreError> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| StoreError::io(job_id, &path, e))?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| StoreError::Io {
        path,
        source: io::Error::from(errno),
    })
}

fn read_record(dir: &Path, job_id: &str) -> Result<Job, StoreError> {
    let path = dir.join(STATE_FILE);
    let content = fs::read(&path).map_err(|e| StoreError::io(job_id, &path, e))?;
    let job: Job = serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
        job_id: job_id.to_string(),
        message: e.to_string(),
    })?;
    if job.job_id != job_id {
        return Err(StoreError::Corrupt {
            job_id: job_id.to_string(),
            message: format!("record names job {}", job.job_id),
        });
    }
    Ok(job)
}

/// Write temp file + fsync + rename over `state.json`.
fn write_record(dir: &Path, job: &Job) -> Result<(), StoreError> {
    let path = dir.join(STATE_FILE);
    let io_err = |source: io::Error| StoreError::Io {
        path: path.clone(),
        source,
    };

    let content = serde_json::to_vec_pretty(job).map_err(|e| StoreError::Corrupt {
        job_id: job.job_id.clone(),
        message: e.to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&content).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(&path).map_err(|e| io_err(e.error))?;
    Ok(())
}
