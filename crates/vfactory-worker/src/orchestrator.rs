//! Pipeline orchestrator.
//!
//! Drives one job through download, the three tool stages and upload,
//! persisting each status change before starting the next step. Any step
//! failure ends the job as FAILED; the workspace is released on every path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Instrument};

use vfactory_media::{
    AdapterFailure, AdapterSuccess, SilenceRemover, StageInput, SubtitleBurner, ToolAdapter,
    Transcriber,
};
use vfactory_models::{JobId, JobStatus, ProcessedMetadata, ProcessingJob};
use vfactory_storage::StorageGateway;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job_store::JobStore;
use crate::logging::JobLogger;
use crate::metrics::{record_job_completed, record_job_failed, record_stage_duration};
use crate::workspace::{Workspace, WorkspaceManager};

/// Progress checkpoints.
pub mod progress {
    pub const START: u8 = 0;
    pub const AUTO_EDITED: u8 = 33;
    pub const TRANSCRIBED: u8 = 66;
    pub const SUBTITLED: u8 = 90;
}

const SUBTITLES_FILE: &str = "subtitles.srt";
const FALLBACK_FILENAME: &str = "video.mp4";

/// A unit of work whose failure ends the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Validation,
    WorkspaceSetup,
    Download,
    AutoEditing,
    Transcription,
    SubtitleBurnIn,
    Upload,
}

impl Step {
    /// Human-readable label, used as the error message prefix.
    pub fn label(&self) -> &'static str {
        match self {
            Step::Validation => "Validation",
            Step::WorkspaceSetup => "Workspace setup",
            Step::Download => "Download",
            Step::AutoEditing => "Auto-editing",
            Step::Transcription => "Transcription",
            Step::SubtitleBurnIn => "Subtitle burn-in",
            Step::Upload => "Upload",
        }
    }

    fn metric_name(&self) -> &'static str {
        match self {
            Step::Validation => "validation",
            Step::WorkspaceSetup => "workspace_setup",
            Step::Download => "download",
            Step::AutoEditing => "auto_editing",
            Step::Transcription => "transcription",
            Step::SubtitleBurnIn => "subtitle_burn_in",
            Step::Upload => "upload",
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: Step,
    pub reason: String,
    /// Trimmed tail of the tool output, possibly empty
    pub diagnostic: String,
}

impl StepFailure {
    pub fn new(step: Step, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
            diagnostic: String::new(),
        }
    }

    pub fn from_adapter(step: Step, failure: &AdapterFailure) -> Self {
        Self {
            step,
            reason: failure.reason.clone(),
            diagnostic: failure.diagnostic_tail().to_string(),
        }
    }

    /// The message persisted on the job.
    pub fn message(&self) -> String {
        let mut message = format!("{} failed: {}", self.step.label(), self.reason);
        if !self.diagnostic.is_empty() {
            message.push('\n');
            message.push_str(&self.diagnostic);
        }
        message
    }
}

/// Runs jobs end to end.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn StorageGateway>,
    workspaces: WorkspaceManager,
    silence: Arc<dyn ToolAdapter>,
    transcriber: Arc<dyn ToolAdapter>,
    burner: Arc<dyn ToolAdapter>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn StorageGateway>,
        workspaces: WorkspaceManager,
        silence: Arc<dyn ToolAdapter>,
        transcriber: Arc<dyn ToolAdapter>,
        burner: Arc<dyn ToolAdapter>,
    ) -> Self {
        Self {
            store,
            storage,
            workspaces,
            silence,
            transcriber,
            burner,
        }
    }

    /// Pipeline backed by the real tools.
    pub fn from_config(
        config: &WorkerConfig,
        store: Arc<dyn JobStore>,
        storage: Arc<dyn StorageGateway>,
    ) -> WorkerResult<Self> {
        Ok(Self::new(
            store,
            storage,
            WorkspaceManager::new(&config.temp_folder),
            Arc::new(SilenceRemover::new(config.silence_remover())),
            Arc::new(Transcriber::new(config.transcriber()?)),
            Arc::new(SubtitleBurner::new(config.subtitle_burner())),
        ))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Process an UPLOADED job to a terminal state.
    ///
    /// Returns the terminal job, COMPLETED or FAILED. An `Err` means the job
    /// was not accepted (unknown, or not UPLOADED) or its final state could
    /// not be persisted.
    pub async fn process(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Uploaded {
            return Err(WorkerError::WrongState {
                job_id: job_id.clone(),
                status: job.status,
                expected: JobStatus::Uploaded,
            });
        }

        let logger = JobLogger::new(job_id, "pipeline");
        let span = logger.create_span();
        self.process_uploaded(job, logger).instrument(span).await
    }

    async fn process_uploaded(&self, job: ProcessingJob, logger: JobLogger) -> WorkerResult<ProcessingJob> {
        let started = Instant::now();
        logger.log_start(&format!("{} from {}", job.original_filename, job.owner_id));

        let Some(input_ref) = job.valid_input_reference().map(str::to_string) else {
            let failure = StepFailure::new(Step::Validation, "job has no input reference");
            return self.fail_job(&job.id, progress::START, failure, started, &logger).await;
        };

        let mut workspace = match self.workspaces.acquire(&job.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                let failure = StepFailure::new(Step::WorkspaceSetup, e.to_string());
                return self.fail_job(&job.id, progress::START, failure, started, &logger).await;
            }
        };

        let mut tracker = ProgressTracker {
            store: self.store.as_ref(),
            job_id: &job.id,
            progress: job.progress,
        };
        let outcome = self
            .run_steps(&job, &input_ref, &workspace, &mut tracker, &logger)
            .await;
        let last_progress = tracker.progress;

        workspace.release().await;

        match outcome {
            Ok(locator) => match self.store.complete(&job.id, &locator).await {
                Ok(done) => {
                    record_job_completed(started.elapsed());
                    logger.log_completion(&format!(
                        "output at {} in {:.1}s",
                        locator,
                        started.elapsed().as_secs_f64()
                    ));
                    Ok(done)
                }
                Err(e) => {
                    if let Err(del) = self.storage.delete(&locator).await {
                        logger.log_warning(&format!("Could not remove orphaned output {}: {}", locator, del));
                    }
                    let failure = StepFailure::new(Step::Upload, format!("could not record completion: {}", e));
                    self.fail_job(&job.id, last_progress, failure, started, &logger).await
                }
            },
            Err(failure) => self.fail_job(&job.id, last_progress, failure, started, &logger).await,
        }
    }

    async fn run_steps(
        &self,
        job: &ProcessingJob,
        input_ref: &str,
        workspace: &Workspace,
        tracker: &mut ProgressTracker<'_>,
        logger: &JobLogger,
    ) -> Result<String, StepFailure> {
        let filename = sanitize_filename(&job.original_filename);

        let source = workspace.file(&format!("input_{}", filename));
        let download_started = Instant::now();
        let downloaded = self.storage.download(input_ref, &source).await;
        record_stage_duration(Step::Download.metric_name(), downloaded.is_ok(), download_started.elapsed());
        downloaded.map_err(|e| StepFailure::new(Step::Download, e.to_string()))?;
        logger.log_progress(&format!("Downloaded input via {} storage", self.storage.backend()));

        tracker.advance(JobStatus::AutoEditing, progress::START, Step::AutoEditing).await?;
        let edited = self
            .run_stage(
                Step::AutoEditing,
                self.silence.as_ref(),
                &StageInput::new(&source, workspace.path()),
                &workspace.file(&format!("edited_{}", filename)),
                logger,
            )
            .await?;
        tracker.advance(JobStatus::AutoEditing, progress::AUTO_EDITED, Step::AutoEditing).await?;

        tracker.advance(JobStatus::Transcribing, progress::AUTO_EDITED, Step::Transcription).await?;
        let transcript = self
            .run_stage(
                Step::Transcription,
                self.transcriber.as_ref(),
                &StageInput::new(&edited.output, workspace.path()),
                &workspace.file(SUBTITLES_FILE),
                logger,
            )
            .await?;
        tracker.advance(JobStatus::Transcribing, progress::TRANSCRIBED, Step::Transcription).await?;

        tracker.advance(JobStatus::AddingSubtitles, progress::TRANSCRIBED, Step::SubtitleBurnIn).await?;
        let rendered = self
            .run_stage(
                Step::SubtitleBurnIn,
                self.burner.as_ref(),
                &StageInput::new(&edited.output, workspace.path()).with_subtitles(&transcript.output),
                &workspace.file(&format!("processed_{}", filename)),
                logger,
            )
            .await?;
        tracker.advance(JobStatus::AddingSubtitles, progress::SUBTITLED, Step::SubtitleBurnIn).await?;

        let metadata = processed_metadata(&rendered, &transcript).await;
        if let Err(e) = self.store.set_processed_metadata(&job.id, metadata).await {
            logger.log_warning(&format!("Could not store processed metadata: {}", e));
        }

        let key = output_key(&job.owner_id, &job.id, &job.original_filename);
        let upload_started = Instant::now();
        let uploaded = self.storage.upload(&rendered.output, &key).await;
        record_stage_duration(Step::Upload.metric_name(), uploaded.is_ok(), upload_started.elapsed());
        let locator = uploaded.map_err(|e| StepFailure::new(Step::Upload, e.to_string()))?;
        logger.log_progress(&format!("Uploaded output as {}", key));

        Ok(locator)
    }

    async fn run_stage(
        &self,
        step: Step,
        adapter: &dyn ToolAdapter,
        input: &StageInput,
        output: &Path,
        logger: &JobLogger,
    ) -> Result<AdapterSuccess, StepFailure> {
        let stage_logger = logger.for_operation(adapter.name());
        stage_logger.log_start(step.label());

        let started = Instant::now();
        let result = adapter.run(input, output).await;
        record_stage_duration(step.metric_name(), result.is_ok(), started.elapsed());

        match result {
            Ok(success) => {
                stage_logger.log_progress(&format!(
                    "{} finished in {:.1}s",
                    step.label(),
                    started.elapsed().as_secs_f64()
                ));
                Ok(success)
            }
            Err(failure) => {
                stage_logger.log_error(&format!("{}: {}", step.label(), failure));
                Err(StepFailure::from_adapter(step, &failure))
            }
        }
    }

    async fn fail_job(
        &self,
        job_id: &JobId,
        progress: u8,
        failure: StepFailure,
        started: Instant,
        logger: &JobLogger,
    ) -> WorkerResult<ProcessingJob> {
        let message = failure.message();
        logger.log_error(&message);
        record_job_failed(failure.step.metric_name(), started.elapsed());

        self.store
            .update_status(job_id, JobStatus::Failed, progress, Some(message))
            .await
    }
}

/// Persists progress and remembers the last value written.
struct ProgressTracker<'a> {
    store: &'a dyn JobStore,
    job_id: &'a JobId,
    progress: u8,
}

impl ProgressTracker<'_> {
    async fn advance(&mut self, status: JobStatus, progress: u8, step: Step) -> Result<(), StepFailure> {
        self.store
            .update_status(self.job_id, status, progress, None)
            .await
            .map_err(|e| StepFailure::new(step, format!("could not persist progress: {}", e)))?;
        self.progress = progress;
        info!(job_id = %self.job_id, status = %status, progress, "Job progress persisted");
        Ok(())
    }
}

async fn processed_metadata(rendered: &AdapterSuccess, transcript: &AdapterSuccess) -> ProcessedMetadata {
    let mut metadata = match &rendered.metadata.video {
        Some(video) => ProcessedMetadata::from(video.clone()),
        None => {
            warn!(output = %rendered.output.display(), "No probe data for processed output");
            let size_bytes = tokio::fs::metadata(&rendered.output)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            ProcessedMetadata {
                size_bytes,
                ..Default::default()
            }
        }
    };
    metadata.subtitle_cues = transcript.metadata.cue_count.or(rendered.metadata.cue_count);
    metadata
}

/// Storage key of a job's processed output.
pub fn output_key(owner_id: &str, job_id: &JobId, original_filename: &str) -> String {
    format!(
        "outputs/{}/{}_processed_{}",
        sanitize_component(owner_id),
        job_id,
        sanitize_filename(original_filename)
    )
}

/// Reduce a user-supplied filename to a safe single path component.
///
/// Keeps ASCII letters, digits, `.`, `_` and `-`, drops leading dots and
/// guarantees an extension so the tools can infer the container.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned = sanitize_component(&base);
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return FALLBACK_FILENAME.to_string();
    }
    match PathBuf::from(cleaned).extension() {
        Some(_) => cleaned.to_string(),
        None => format!("{}.mp4", cleaned),
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
