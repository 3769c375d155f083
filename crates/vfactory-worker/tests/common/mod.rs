//! Shared fixtures for worker integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vfactory_media::{
    AdapterFailure, AdapterMetadata, AdapterResult, AdapterSuccess, FailureKind, StageInput,
    ToolAdapter,
};
use vfactory_models::{JobId, JobStatus, ProcessedMetadata, ProcessingJob};
use vfactory_storage::{FileInfo, LocalStorage, StorageError, StorageGateway, StorageResult};
use vfactory_worker::{InMemoryJobStore, JobStore, Pipeline, WorkerResult, WorkspaceManager};

pub const SAMPLE_SRT: &str = "1\n00:00:00,000 --> 00:00:01,500\nHello there\n\n";

// ============================================================================
// Job store that records every persisted state
// ============================================================================

#[derive(Default)]
pub struct RecordingJobStore {
    inner: InMemoryJobStore,
    history: Mutex<Vec<(JobId, JobStatus, u8)>>,
}

impl RecordingJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted (status, progress) pairs of one job, in write order.
    pub fn history(&self, job_id: &JobId) -> Vec<(JobStatus, u8)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, status, progress)| (*status, *progress))
            .collect()
    }

    pub fn progress_history(&self, job_id: &JobId) -> Vec<u8> {
        self.history(job_id).into_iter().map(|(_, p)| p).collect()
    }

    fn record(&self, job: &ProcessingJob) {
        self.history
            .lock()
            .unwrap()
            .push((job.id.clone(), job.status, job.progress));
    }
}

#[async_trait]
impl JobStore for RecordingJobStore {
    async fn create(&self, job: &ProcessingJob) -> WorkerResult<()> {
        self.inner.create(job).await?;
        self.record(job);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        self.inner.get(job_id).await
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: u8,
        error_message: Option<String>,
    ) -> WorkerResult<ProcessingJob> {
        let job = self
            .inner
            .update_status(job_id, status, progress, error_message)
            .await?;
        self.record(&job);
        Ok(job)
    }

    async fn set_output_reference(&self, job_id: &JobId, reference: &str) -> WorkerResult<ProcessingJob> {
        self.inner.set_output_reference(job_id, reference).await
    }

    async fn complete(&self, job_id: &JobId, output_reference: &str) -> WorkerResult<ProcessingJob> {
        let job = self.inner.complete(job_id, output_reference).await?;
        self.record(&job);
        Ok(job)
    }

    async fn set_processed_metadata(
        &self,
        job_id: &JobId,
        metadata: ProcessedMetadata,
    ) -> WorkerResult<ProcessingJob> {
        self.inner.set_processed_metadata(job_id, metadata).await
    }

    async fn list_by_status(&self, status: JobStatus) -> WorkerResult<Vec<ProcessingJob>> {
        self.inner.list_by_status(status).await
    }

    async fn list_for_owner(&self, owner_id: &str) -> WorkerResult<Vec<ProcessingJob>> {
        self.inner.list_for_owner(owner_id).await
    }
}

// ============================================================================
// Fake adapters
// ============================================================================

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Copy the input media to the output
    Copy,
    /// Write fixed text to the output
    Write(String),
    /// Fail with a reason and diagnostic
    Fail(FailureKind, String, String),
    /// Sleep, then copy
    Slow(Duration),
    /// Panic with a message
    Panic(&'static str),
}

/// Adapter that skips subprocesses entirely.
pub struct FakeAdapter {
    name: &'static str,
    behavior: Behavior,
    calls: Mutex<Vec<StageInput>>,
}

impl FakeAdapter {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<StageInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolAdapter for FakeAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, input: &StageInput, output: &Path) -> AdapterResult {
        self.calls.lock().unwrap().push(input.clone());
        if !input.media.is_file() {
            return Err(AdapterFailure::missing_input(&input.media));
        }

        match &self.behavior {
            Behavior::Copy => {
                tokio::fs::copy(&input.media, output).await.unwrap();
            }
            Behavior::Write(text) => {
                tokio::fs::write(output, text).await.unwrap();
            }
            Behavior::Fail(kind, reason, diagnostic) => {
                return Err(AdapterFailure::new(*kind, reason.clone()).with_diagnostic(diagnostic.clone()));
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                tokio::fs::copy(&input.media, output).await.unwrap();
            }
            Behavior::Panic(message) => panic!("{}", message),
        }

        let metadata = match &self.behavior {
            Behavior::Write(text) => AdapterMetadata {
                cue_count: Some(vfactory_media::parse_srt(text).map(|c| c.len()).unwrap_or(0)),
                ..Default::default()
            },
            _ => AdapterMetadata::default(),
        };
        Ok(AdapterSuccess::new(output).with_metadata(metadata))
    }
}

// ============================================================================
// Storage that refuses uploads
// ============================================================================

pub struct DenyingUploadStorage {
    inner: LocalStorage,
}

impl DenyingUploadStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageGateway for DenyingUploadStorage {
    fn backend(&self) -> &'static str {
        "denying"
    }

    async fn download(&self, locator: &str, local_path: &Path) -> StorageResult<()> {
        self.inner.download(locator, local_path).await
    }

    async fn upload(&self, _local_path: &Path, key: &str) -> StorageResult<String> {
        Err(StorageError::access_denied(key))
    }

    async fn delete(&self, locator: &str) -> StorageResult<bool> {
        self.inner.delete(locator).await
    }

    async fn exists(&self, locator: &str) -> StorageResult<bool> {
        self.inner.exists(locator).await
    }

    async fn download_url(&self, locator: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.download_url(locator, expires_in).await
    }

    async fn file_info(&self, locator: &str) -> StorageResult<FileInfo> {
        self.inner.file_info(locator).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<RecordingJobStore>,
    pub storage: Arc<LocalStorage>,
    pub workspaces: WorkspaceManager,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().join("output")).unwrap());
        let workspaces = WorkspaceManager::new(dir.path().join("temp"));
        Self {
            dir,
            store: Arc::new(RecordingJobStore::new()),
            storage,
            workspaces,
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    /// Store an uploaded video and create its job.
    pub async fn upload_job(&self, owner: &str, filename: &str) -> ProcessingJob {
        let uploads = self.uploads_dir();
        std::fs::create_dir_all(&uploads).unwrap();
        let source = uploads.join(format!("{}-{}", owner, filename));
        std::fs::write(&source, format!("video of {}", owner)).unwrap();

        let job = ProcessingJob::new(owner, filename, source.to_string_lossy());
        self.store.create(&job).await.unwrap();
        job
    }

    pub fn workspace_path(&self, job_id: &JobId) -> PathBuf {
        self.workspaces.root().join(format!("job_{}", job_id))
    }

    pub fn pipeline(
        &self,
        silence: Arc<dyn ToolAdapter>,
        transcriber: Arc<dyn ToolAdapter>,
        burner: Arc<dyn ToolAdapter>,
    ) -> Pipeline {
        Pipeline::new(
            self.store.clone(),
            self.storage.clone(),
            self.workspaces.clone(),
            silence,
            transcriber,
            burner,
        )
    }

    /// Pipeline whose three stages succeed.
    pub fn happy_pipeline(&self) -> Pipeline {
        self.pipeline(
            FakeAdapter::new("fake-auto-editor", Behavior::Copy),
            FakeAdapter::new("fake-whisper", Behavior::Write(SAMPLE_SRT.to_string())),
            FakeAdapter::new("fake-ffmpeg", Behavior::Copy),
        )
    }
}
