//! Job executor.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vfactory_models::{JobId, JobStatus};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::job_store::JobStore;
use crate::metrics::set_jobs_in_flight;
use crate::orchestrator::Pipeline;

/// Message recorded on jobs found mid-pipeline at start-up.
pub const INTERRUPTED_MESSAGE: &str = "Processing was interrupted before completion";

type InFlight = Arc<Mutex<HashSet<JobId>>>;

/// Polls the job store and runs uploaded jobs through the pipeline.
pub struct JobExecutor {
    config: WorkerConfig,
    pipeline: Arc<Pipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    in_flight: InFlight,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, pipeline: Pipeline) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        self.pipeline.store()
    }

    /// Run until [`shutdown`](Self::shutdown) is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor with {} max concurrent jobs",
            self.config.max_concurrent_jobs
        );

        let recovered = self.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "Failed jobs interrupted by a previous shutdown");
        }
        if let Err(e) = self.pipeline.workspaces().sweep_stale().await {
            warn!("Failed to sweep stale workspaces: {}", e);
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_ready().await {
                        error!("Failed to dispatch jobs: {}", e);
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight_count(),
                "Shutdown timeout reached with jobs still running"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Fail jobs left mid-pipeline by a previous run.
    ///
    /// The pipeline cannot resume from a checkpoint, so such jobs would
    /// otherwise stay non-terminal forever.
    pub async fn recover_interrupted(&self) -> WorkerResult<usize> {
        let mut recovered = 0;
        for status in [
            JobStatus::AutoEditing,
            JobStatus::Transcribing,
            JobStatus::AddingSubtitles,
        ] {
            for job in self.store().list_by_status(status).await? {
                if self.is_in_flight(&job.id) {
                    continue;
                }
                self.store()
                    .update_status(&job.id, JobStatus::Failed, job.progress, Some(INTERRUPTED_MESSAGE.to_string()))
                    .await?;
                warn!(job_id = %job.id, status = %status, "Marked interrupted job as failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Start every uploaded job that fits into a free slot.
    ///
    /// Returns how many jobs were started.
    pub async fn dispatch_ready(&self) -> WorkerResult<usize> {
        let jobs = self.store().list_by_status(JobStatus::Uploaded).await?;
        let mut dispatched = 0;

        for job in jobs {
            if self.is_in_flight(&job.id) {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.job_semaphore).try_acquire_owned() else {
                debug!("All job slots busy");
                break;
            };

            let guard = InFlightGuard::register(&self.in_flight, job.id.clone());
            let pipeline = Arc::clone(&self.pipeline);
            let timeout = self.config.job_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                Self::execute_job(pipeline, job.id, timeout).await;
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!(dispatched, "Dispatched jobs");
        }
        Ok(dispatched)
    }

    /// Run one job under the whole-job timeout.
    ///
    /// The pipeline runs in its own task so a panic inside it surfaces as a
    /// `JoinError` here and the job still ends FAILED.
    async fn execute_job(pipeline: Arc<Pipeline>, job_id: JobId, timeout: Duration) {
        info!(job_id = %job_id, "Executing job");

        let mut task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let job_id = job_id.clone();
            async move { pipeline.process(&job_id).await }
        });

        let message = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(job))) => {
                info!(job_id = %job_id, status = %job.status, "Job finished");
                return;
            }
            Ok(Ok(Err(e))) if e.is_rejection() => {
                debug!(job_id = %job_id, "Job no longer eligible: {}", e);
                return;
            }
            Ok(Ok(Err(e))) => format!("Processing error: {}", e),
            Ok(Err(e)) if e.is_panic() => {
                format!("Processing error: job task panicked: {}", panic_message(e.into_panic()))
            }
            Ok(Err(e)) => format!("Processing error: {}", e),
            Err(_) => {
                // Wait for the aborted task so the tool is killed and the
                // workspace removed before the job is marked.
                task.abort();
                let _ = task.await;
                format!("Processing timed out after {:?}", timeout)
            }
        };

        error!(job_id = %job_id, "{}", message);
        mark_failed(pipeline.store().as_ref(), &job_id, &message).await;
    }

    /// Wait for all in-flight jobs to complete.
    pub async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn is_in_flight(&self, job_id: &JobId) -> bool {
        lock(&self.in_flight).contains(job_id)
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Best-effort move to FAILED for a job the pipeline could not finish.
async fn mark_failed(store: &dyn JobStore, job_id: &JobId, message: &str) {
    let job = match store.get(job_id).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = %job_id, "Could not load job to mark it failed: {}", e);
            return;
        }
    };
    if job.is_terminal() {
        return;
    }
    if let Err(e) = store
        .update_status(job_id, JobStatus::Failed, job.progress, Some(message.to_string()))
        .await
    {
        error!(job_id = %job_id, "Could not mark job failed: {}", e);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a job id in the in-flight set until dropped.
struct InFlightGuard {
    in_flight: InFlight,
    job_id: JobId,
}

impl InFlightGuard {
    fn register(in_flight: &InFlight, job_id: JobId) -> Self {
        let count = {
            let mut set = lock(in_flight);
            set.insert(job_id.clone());
            set.len()
        };
        set_jobs_in_flight(count);
        Self {
            in_flight: Arc::clone(in_flight),
            job_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let count = {
            let mut set = lock(&self.in_flight);
            set.remove(&self.job_id);
            set.len()
        };
        set_jobs_in_flight(count);
    }
}
