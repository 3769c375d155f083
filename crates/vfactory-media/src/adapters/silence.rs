//! Silence removal with auto-editor.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{require_input, require_output, AdapterResult, AdapterSuccess, StageInput, ToolAdapter};
use crate::command::{ToolCommand, ToolRunner};

/// Configuration for [`SilenceRemover`].
#[derive(Debug, Clone)]
pub struct SilenceRemoverConfig {
    /// auto-editor binary name or path
    pub binary: String,
    /// Seconds of padding kept around detected speech
    pub margin_secs: f64,
    /// Extra arguments appended verbatim
    pub extra_args: Vec<String>,
    /// Maximum run time
    pub timeout: Duration,
}

impl Default for SilenceRemoverConfig {
    fn default() -> Self {
        Self {
            binary: "auto-editor".to_string(),
            margin_secs: 0.2,
            extra_args: Vec::new(),
            timeout: Duration::from_secs(900),
        }
    }
}

/// Removes silent segments from a video.
#[derive(Debug, Clone, Default)]
pub struct SilenceRemover {
    config: SilenceRemoverConfig,
}

impl SilenceRemover {
    pub fn new(config: SilenceRemoverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SilenceRemoverConfig {
        &self.config
    }

    fn build_command(&self, input: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.config.binary)
            .path_arg(input)
            .arg("--margin")
            .arg(format!("{}sec", self.config.margin_secs))
            .arg("--no-open")
            .args(self.config.extra_args.iter().cloned())
            .arg("--output")
            .path_arg(output)
    }
}

#[async_trait]
impl ToolAdapter for SilenceRemover {
    fn name(&self) -> &'static str {
        "auto-editor"
    }

    async fn run(&self, input: &StageInput, output: &Path) -> AdapterResult {
        require_input(&input.media)?;

        let cmd = self.build_command(&input.media, output);
        let start = Instant::now();
        debug!(margin = self.config.margin_secs, "Removing silence");

        ToolRunner::new()
            .with_timeout(self.config.timeout)
            .run(&cmd)
            .await?;

        require_output(output).await?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            output = %output.display(),
            "Silence removal finished"
        );
        Ok(AdapterSuccess::new(output))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::FailureKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn fake_tool(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-auto-editor");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input_clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        (dir, input)
    }

    const WRITE_OUTPUT: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
printf edited > "$out""#;

    #[test]
    fn test_command_layout() {
        let remover = SilenceRemover::new(SilenceRemoverConfig {
            extra_args: vec!["--edit".into(), "audio:threshold=0.04".into()],
            ..Default::default()
        });
        let cmd = remover.build_command(Path::new("in.mp4"), Path::new("out.mp4"));
        assert_eq!(
            cmd.get_args(),
            ["in.mp4", "--margin", "0.2sec", "--no-open", "--edit", "audio:threshold=0.04", "--output", "out.mp4"]
        );
    }

    #[tokio::test]
    async fn test_success_writes_output() {
        let (dir, input) = setup();
        let remover = SilenceRemover::new(SilenceRemoverConfig {
            binary: fake_tool(dir.path(), WRITE_OUTPUT),
            ..Default::default()
        });
        let output = dir.path().join("edited_clip.mp4");

        let success = remover
            .run(&StageInput::new(&input, dir.path()), &output)
            .await
            .unwrap();
        assert_eq!(success.output, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"edited");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let (dir, input) = setup();
        let remover = SilenceRemover::new(SilenceRemoverConfig {
            binary: fake_tool(dir.path(), "echo 'Error! could not decode audio' >&2; exit 1"),
            ..Default::default()
        });

        let failure = remover
            .run(&StageInput::new(&input, dir.path()), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert!(failure.diagnostic.contains("could not decode audio"));
    }

    #[tokio::test]
    async fn test_exit_zero_without_output() {
        let (dir, input) = setup();
        let remover = SilenceRemover::new(SilenceRemoverConfig {
            binary: fake_tool(dir.path(), "exit 0"),
            ..Default::default()
        });

        let failure = remover
            .run(&StageInput::new(&input, dir.path()), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingOutput);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let failure = SilenceRemover::default()
            .run(
                &StageInput::new(dir.path().join("nope.mp4"), dir.path()),
                &dir.path().join("out.mp4"),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingInput);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (dir, input) = setup();
        let remover = SilenceRemover::new(SilenceRemoverConfig {
            binary: fake_tool(dir.path(), "exec sleep 30"),
            timeout: Duration::from_millis(200),
            ..Default::default()
        });

        let failure = remover
            .run(&StageInput::new(&input, dir.path()), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
    }
}
