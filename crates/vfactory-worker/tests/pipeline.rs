//! Pipeline orchestration tests with fake adapters and local storage.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use vfactory_media::FailureKind;
use vfactory_models::{JobId, JobStatus, ProcessingJob};
use vfactory_storage::StorageGateway;
use vfactory_worker::{JobStore, Pipeline, WorkerError};

use common::{Behavior, DenyingUploadStorage, FakeAdapter, Harness};

#[tokio::test]
async fn test_successful_job_completes() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "My Clip.mp4").await;

    let done = assert_ok!(h.happy_pipeline().process(&job.id).await);

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.error_message.is_none());
    assert!(done.completed_at.is_some());

    let locator = done.output_reference.clone().unwrap();
    assert!(locator.ends_with(&format!("outputs/user-1/{}_processed_My_Clip.mp4", job.id)));
    assert_eq!(std::fs::read_to_string(&locator).unwrap(), "video of user-1");
    let info = assert_ok!(h.storage.file_info(&locator).await);
    assert_eq!(info.size, "video of user-1".len() as u64);
    assert_eq!(info.content_type.as_deref(), Some("video/mp4"));

    let metadata = done.processed_metadata.clone().unwrap();
    assert_eq!(metadata.subtitle_cues, Some(1));
    assert_eq!(metadata.size_bytes, "video of user-1".len() as u64);

    assert!(!h.workspace_path(&job.id).exists());
    assert_eq!(h.store.get(&job.id).await.unwrap(), done);
}

#[tokio::test]
async fn test_progress_is_persisted_in_stage_order() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;

    h.happy_pipeline().process(&job.id).await.unwrap();

    assert_eq!(
        h.store.history(&job.id),
        vec![
            (JobStatus::Uploaded, 0),
            (JobStatus::AutoEditing, 0),
            (JobStatus::AutoEditing, 33),
            (JobStatus::Transcribing, 33),
            (JobStatus::Transcribing, 66),
            (JobStatus::AddingSubtitles, 66),
            (JobStatus::AddingSubtitles, 90),
            (JobStatus::Completed, 100),
        ]
    );
}

#[tokio::test]
async fn test_stages_chain_their_outputs() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    let silence = FakeAdapter::new("auto-editor", Behavior::Copy);
    let transcriber = FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into()));
    let burner = FakeAdapter::new("ffmpeg", Behavior::Copy);

    h.pipeline(silence.clone(), transcriber.clone(), burner.clone())
        .process(&job.id)
        .await
        .unwrap();

    let workspace = h.workspace_path(&job.id);
    let silence_input = &silence.calls()[0];
    assert_eq!(silence_input.media, workspace.join("input_clip.mp4"));
    assert_eq!(silence_input.scratch_dir, workspace);

    let edited = workspace.join("edited_clip.mp4");
    assert_eq!(transcriber.calls()[0].media, edited);

    let burn_input = &burner.calls()[0];
    assert_eq!(burn_input.media, edited);
    assert_eq!(burn_input.subtitles.as_deref(), Some(workspace.join("subtitles.srt").as_path()));
}

#[tokio::test]
async fn test_silence_removal_failure_fails_job() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    let transcriber = FakeAdapter::new("whisper", Behavior::Write(String::new()));
    let pipeline = h.pipeline(
        FakeAdapter::new(
            "auto-editor",
            Behavior::Fail(
                FailureKind::NonZeroExit,
                "auto-editor exited with exit code 1".into(),
                "Error: could not decode input\n".into(),
            ),
        ),
        transcriber.clone(),
        FakeAdapter::new("ffmpeg", Behavior::Copy),
    );

    let failed = pipeline.process(&job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 0);
    assert!(failed.output_reference.is_none());
    let message = failed.error_message.unwrap();
    assert!(message.starts_with("Auto-editing failed: auto-editor exited with exit code 1"));
    assert!(message.contains("Error: could not decode input"));

    assert!(transcriber.calls().is_empty());
    assert!(!h.workspace_path(&job.id).exists());
    assert_eq!(
        h.store.history(&job.id).last(),
        Some(&(JobStatus::Failed, 0))
    );
}

#[tokio::test]
async fn test_burn_in_timeout_fails_job_at_66() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    let pipeline = h.pipeline(
        FakeAdapter::new("auto-editor", Behavior::Copy),
        FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into())),
        FakeAdapter::new(
            "ffmpeg",
            Behavior::Fail(
                FailureKind::Timeout,
                "ffmpeg timed out after 300s".into(),
                "frame=  120 fps= 30".into(),
            ),
        ),
    );

    let failed = pipeline.process(&job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 66);
    assert!(failed
        .error_message
        .unwrap()
        .starts_with("Subtitle burn-in failed: ffmpeg timed out"));
    assert!(!h.workspace_path(&job.id).exists());
    assert_eq!(h.store.progress_history(&job.id), vec![0, 0, 33, 33, 66, 66, 66]);
}

#[tokio::test]
async fn test_silent_video_produces_empty_subtitles_and_completes() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "quiet.mp4").await;
    let pipeline = h.pipeline(
        FakeAdapter::new("auto-editor", Behavior::Copy),
        FakeAdapter::new("whisper", Behavior::Write(String::new())),
        FakeAdapter::new("ffmpeg", Behavior::Copy),
    );

    let done = pipeline.process(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.processed_metadata.unwrap().subtitle_cues, Some(0));
}

#[tokio::test]
async fn test_missing_input_artifact_fails_download() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    std::fs::remove_file(job.input_reference.as_deref().unwrap()).unwrap();

    let failed = h.happy_pipeline().process(&job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 0);
    assert!(failed.error_message.unwrap().starts_with("Download failed: "));
    assert!(!h.workspace_path(&job.id).exists());
}

#[tokio::test]
async fn test_job_without_input_reference_is_failed() {
    let h = Harness::new();
    let mut job = ProcessingJob::new("user-1", "clip.mp4", "");
    job.input_reference = None;
    h.store.create(&job).await.unwrap();

    let failed = h.happy_pipeline().process(&job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Validation failed: job has no input reference")
    );
    assert!(!h.workspace_path(&job.id).exists());
}

#[tokio::test]
async fn test_upload_failure_fails_job() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    let storage = Arc::new(DenyingUploadStorage::new((*h.storage).clone()));
    let pipeline = Pipeline::new(
        h.store.clone(),
        storage,
        h.workspaces.clone(),
        FakeAdapter::new("auto-editor", Behavior::Copy),
        FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into())),
        FakeAdapter::new("ffmpeg", Behavior::Copy),
    );

    let failed = pipeline.process(&job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 90);
    assert!(failed.output_reference.is_none());
    assert!(failed.error_message.unwrap().starts_with("Upload failed: "));
    assert!(!h.workspace_path(&job.id).exists());
}

#[tokio::test]
async fn test_jobs_not_uploaded_are_rejected_untouched() {
    let h = Harness::new();
    let job = h.upload_job("user-1", "clip.mp4").await;
    h.happy_pipeline().process(&job.id).await.unwrap();
    let before = h.store.history(&job.id).len();

    let err = assert_err!(h.happy_pipeline().process(&job.id).await);
    assert!(matches!(
        err,
        WorkerError::WrongState {
            status: JobStatus::Completed,
            ..
        }
    ));
    assert!(err.is_rejection());
    assert_eq!(h.store.history(&job.id).len(), before);

    let err = assert_err!(h.happy_pipeline().process(&JobId::from_string("nope")).await);
    assert!(matches!(err, WorkerError::JobNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_jobs_use_isolated_workspaces() {
    let h = Harness::new();
    let first = h.upload_job("alice", "clip.mp4").await;
    let second = h.upload_job("bob", "clip.mp4").await;

    let silence = FakeAdapter::new("auto-editor", Behavior::Slow(Duration::from_millis(100)));
    let burner = FakeAdapter::new("ffmpeg", Behavior::Copy);
    let pipeline = h.pipeline(
        silence.clone(),
        FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into())),
        burner.clone(),
    );

    let (a, b) = tokio::join!(pipeline.process(&first.id), pipeline.process(&second.id));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);
    assert_eq!(
        std::fs::read_to_string(a.output_reference.unwrap()).unwrap(),
        "video of alice"
    );
    assert_eq!(
        std::fs::read_to_string(b.output_reference.unwrap()).unwrap(),
        "video of bob"
    );

    for input in silence.calls().iter().chain(burner.calls().iter()) {
        let owner = input.scratch_dir.clone();
        assert!(input.media.starts_with(&owner));
        assert!(
            owner == h.workspace_path(&first.id) || owner == h.workspace_path(&second.id),
            "unexpected scratch dir {}",
            owner.display()
        );
    }
    assert!(!h.workspace_path(&first.id).exists());
    assert!(!h.workspace_path(&second.id).exists());
}

#[cfg(unix)]
mod with_tool_binaries {
    //! The real adapters driven by small shell scripts standing in for the tools.

    use super::*;
    use std::os::unix::fs::PermissionsExt;

    use vfactory_media::{SilenceRemover, SilenceRemoverConfig, SubtitleBurner, SubtitleBurnerConfig};

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_auto_editor_exit_code_is_reported() {
        let h = Harness::new();
        let job = h.upload_job("user-1", "clip.mp4").await;
        let binary = script(
            h.dir.path(),
            "auto-editor",
            "echo 'Error: Unknown codec in input' >&2\nexit 1",
        );
        let silence = Arc::new(SilenceRemover::new(SilenceRemoverConfig {
            binary,
            ..Default::default()
        }));
        let pipeline = h.pipeline(
            silence,
            FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into())),
            FakeAdapter::new("ffmpeg", Behavior::Copy),
        );

        let failed = pipeline.process(&job.id).await.unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 0);
        let message = failed.error_message.unwrap();
        assert!(message.starts_with("Auto-editing failed: "), "{message}");
        assert!(message.contains("Error: Unknown codec in input"), "{message}");
        assert!(!h.workspace_path(&job.id).exists());
    }

    #[tokio::test]
    async fn test_burn_in_timeout_kills_the_tool() {
        let h = Harness::new();
        let job = h.upload_job("user-1", "clip.mp4").await;
        let pid_file = h.dir.path().join("ffmpeg.pid");
        let binary = script(
            h.dir.path(),
            "ffmpeg",
            &format!("echo $$ > {}\nexec sleep 30", pid_file.display()),
        );
        let burner = Arc::new(SubtitleBurner::new(SubtitleBurnerConfig {
            binary,
            timeout: Duration::from_secs(1),
            ..Default::default()
        }));
        let pipeline = h.pipeline(
            FakeAdapter::new("auto-editor", Behavior::Copy),
            FakeAdapter::new("whisper", Behavior::Write(common::SAMPLE_SRT.into())),
            burner,
        );

        let failed = pipeline.process(&job.id).await.unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 66);
        assert!(failed.error_message.unwrap().starts_with("Subtitle burn-in failed: "));
        assert!(!h.workspace_path(&job.id).exists());

        #[cfg(target_os = "linux")]
        {
            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let proc_dir = Path::new("/proc").join(pid.trim());
            let mut gone = false;
            for _ in 0..50 {
                if !proc_dir.exists() {
                    gone = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(gone, "tool process {} still running", pid.trim());
        }
    }
}

#[tokio::test]
#[ignore = "requires ffmpeg, ffprobe, auto-editor and whisper on PATH"]
async fn test_end_to_end_with_real_tools() {
    let h = Harness::new();
    let uploads = h.uploads_dir();
    std::fs::create_dir_all(&uploads).unwrap();
    let source = uploads.join("tone.mp4");

    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-v", "error"])
        .args(["-f", "lavfi", "-i", "testsrc=duration=6:size=320x240:rate=25"])
        .args(["-f", "lavfi", "-i", "sine=frequency=440:duration=3"])
        .args(["-c:v", "libx264", "-c:a", "aac", "-shortest"])
        .arg(&source)
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let job = ProcessingJob::new("user-1", "tone.mp4", source.to_string_lossy());
    h.store.create(&job).await.unwrap();

    let config = vfactory_worker::WorkerConfig {
        temp_folder: h.workspaces.root().to_path_buf(),
        whisper_model: "tiny".into(),
        ..Default::default()
    };
    let pipeline = Pipeline::from_config(&config, h.store.clone(), h.storage.clone()).unwrap();

    let done = pipeline.process(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error_message);
    assert!(done.processed_metadata.unwrap().duration_secs > 0.0);
    assert!(!h.workspace_path(&job.id).exists());
}
