// store.rs - CheckpointStore: one JSON file per job.
//
// Writes go to a temporary file in the same directory, are synced, and then
// renamed over the real file, so a crash mid-write leaves either the old
// checkpoint or the new one, never a torn file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::checkpoint::{JobCheckpoint, JobStatus};
use crate::error::JobError;

/// Persistent store for job checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store backed by `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, JobError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| JobError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically write a checkpoint.
    pub fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), JobError> {
        let path = self.job_file(&checkpoint.job_id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", checkpoint.job_id));
        let json = serde_json::to_string_pretty(checkpoint)?;

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|source| JobError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Load a checkpoint; `None` if the job has never run.
    pub fn load(&self, job_id: &str) -> Result<Option<JobCheckpoint>, JobError> {
        let path = self.job_file(job_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| JobError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// All checkpoints, most recently updated first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<JobCheckpoint>, JobError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| JobError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut checkpoints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| JobError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_checkpoint = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_checkpoint {
                continue;
            }
            let json = fs::read_to_string(&path).map_err(|source| JobError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<JobCheckpoint>(&json) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints)
    }

    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobCheckpoint>, JobError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|cp| cp.status == status)
            .collect())
    }

    fn job_file(&self, job_id: &str) -> Result<PathBuf, JobError> {
        let valid = !job_id.is_empty()
            && !job_id.starts_with('.')
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(JobError::InvalidJobId {
                job_id: job_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.json", job_id)))
    }
}
