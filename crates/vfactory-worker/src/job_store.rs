//! Job persistence.
//!
//! Every mutation goes through the [`ProcessingJob`] methods, so a store
//! can never persist a state the model forbids. Writes are durable before
//! the call returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use vfactory_models::{JobId, JobStatus, ModelError, ProcessedMetadata, ProcessingJob};

use crate::error::{WorkerError, WorkerResult};

/// Durable store of processing jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the id is taken.
    async fn create(&self, job: &ProcessingJob) -> WorkerResult<()>;

    async fn get(&self, job_id: &JobId) -> WorkerResult<ProcessingJob>;

    /// Move a job to `status`.
    ///
    /// `Failed` records `error_message` and keeps the current progress;
    /// `Completed` is rejected, use [`complete`](JobStore::complete).
    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: u8,
        error_message: Option<String>,
    ) -> WorkerResult<ProcessingJob>;

    /// Re-point the output of an already completed job.
    async fn set_output_reference(&self, job_id: &JobId, reference: &str) -> WorkerResult<ProcessingJob>;

    /// Mark the job completed with its output locator in one write.
    async fn complete(&self, job_id: &JobId, output_reference: &str) -> WorkerResult<ProcessingJob>;

    async fn set_processed_metadata(
        &self,
        job_id: &JobId,
        metadata: ProcessedMetadata,
    ) -> WorkerResult<ProcessingJob>;

    /// Jobs in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> WorkerResult<Vec<ProcessingJob>>;

    /// Jobs of one owner, newest first.
    async fn list_for_owner(&self, owner_id: &str) -> WorkerResult<Vec<ProcessingJob>>;
}

fn apply_status(
    job: &mut ProcessingJob,
    status: JobStatus,
    progress: u8,
    error_message: Option<String>,
) -> WorkerResult<()> {
    match status {
        JobStatus::Failed => job.fail(error_message.unwrap_or_default())?,
        JobStatus::Completed => return Err(ModelError::MissingOutputReference.into()),
        JobStatus::Uploaded
        | JobStatus::AutoEditing
        | JobStatus::Transcribing
        | JobStatus::AddingSubtitles => job.advance(status, progress)?,
    }
    Ok(())
}

fn oldest_first(jobs: &mut [ProcessingJob]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn newest_first(jobs: &mut [ProcessingJob]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store kept in process memory. Used by tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, ProcessingJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<F>(&self, job_id: &JobId, f: F) -> WorkerResult<ProcessingJob>
    where
        F: FnOnce(&mut ProcessingJob) -> WorkerResult<()> + Send,
    {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))?;

        // Mutate a copy so a rejected change leaves the stored job untouched.
        let mut job = stored.clone();
        f(&mut job)?;
        *stored = job.clone();
        Ok(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &ProcessingJob) -> WorkerResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(WorkerError::JobExists(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: u8,
        error_message: Option<String>,
    ) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| apply_status(job, status, progress, error_message))
            .await
    }

    async fn set_output_reference(&self, job_id: &JobId, reference: &str) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.set_output_reference(reference)?))
            .await
    }

    async fn complete(&self, job_id: &JobId, output_reference: &str) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.complete(output_reference)?)).await
    }

    async fn set_processed_metadata(
        &self,
        job_id: &JobId,
        metadata: ProcessedMetadata,
    ) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.set_processed_metadata(metadata)?))
            .await
    }

    async fn list_by_status(&self, status: JobStatus) -> WorkerResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_for_owner(&self, owner_id: &str) -> WorkerResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// One JSON document per job under a directory.
///
/// Documents are replaced atomically (temp file, fsync, rename, directory
/// fsync), so a crash leaves either the old or the new version on disk.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job_id: &JobId) -> WorkerResult<PathBuf> {
        job_id.validate()?;
        Ok(self.dir.join(format!("{}.json", job_id)))
    }

    async fn read_job(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        let path = self.job_path(job_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkerError::JobNotFound(job_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    async fn write_job(&self, job: &ProcessingJob) -> WorkerResult<()> {
        let path = self.job_path(&job.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", job.id));
        let data = serde_json::to_vec_pretty(job)?;

        if let Err(e) = write_synced(&tmp, &data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        sync_dir(&self.dir).await?;

        debug!(job_id = %job.id, status = %job.status, progress = job.progress, "Job persisted");
        Ok(())
    }

    async fn mutate<F>(&self, job_id: &JobId, f: F) -> WorkerResult<ProcessingJob>
    where
        F: FnOnce(&mut ProcessingJob) -> WorkerResult<()> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut job = self.read_job(job_id).await?;
        f(&mut job)?;
        self.write_job(&job).await?;
        Ok(job)
    }

    async fn load_all(&self) -> WorkerResult<Vec<ProcessingJob>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut jobs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            let parsed = match fs::read(&path).await {
                Ok(data) => serde_json::from_slice::<ProcessingJob>(&data).map_err(WorkerError::from),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable job document: {}", e),
            }
        }
        Ok(jobs)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: &ProcessingJob) -> WorkerResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(&job.id)?;
        if fs::try_exists(&path).await? {
            return Err(WorkerError::JobExists(job.id.clone()));
        }
        self.write_job(job).await
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        self.read_job(job_id).await
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: u8,
        error_message: Option<String>,
    ) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| apply_status(job, status, progress, error_message))
            .await
    }

    async fn set_output_reference(&self, job_id: &JobId, reference: &str) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.set_output_reference(reference)?))
            .await
    }

    async fn complete(&self, job_id: &JobId, output_reference: &str) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.complete(output_reference)?)).await
    }

    async fn set_processed_metadata(
        &self,
        job_id: &JobId,
        metadata: ProcessedMetadata,
    ) -> WorkerResult<ProcessingJob> {
        self.mutate(job_id, |job| Ok(job.set_processed_metadata(metadata)?))
            .await
    }

    async fn list_by_status(&self, status: JobStatus) -> WorkerResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|job| job.status == status)
            .collect();
        oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_for_owner(&self, owner_id: &str) -> WorkerResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|job| job.owner_id == owner_id)
            .collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }
}
