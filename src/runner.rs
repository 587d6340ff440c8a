//! Execution of external tools.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::compose::{ToolCommand, ToolPaths};
use crate::error::{ExternalToolError, ToolFailure};

/// Captured result of a successful tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs composed commands. Every external invocation goes through this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<ProcessOutput, ExternalToolError>;
}

/// Runs commands as child processes, optionally bounded by a timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ProcessOutput, ExternalToolError> {
        log::info!("Running: {}", command);

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExternalToolError::new(&command.program, ToolFailure::Spawn(e.to_string()), ""))?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                // Dropping the future drops the child, which kills it.
                Err(_) => {
                    log::warn!("{} timed out after {:?}", command.program, limit);
                    return Err(ExternalToolError::new(
                        &command.program,
                        ToolFailure::Timeout(limit),
                        "",
                    ));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| ExternalToolError::new(&command.program, ToolFailure::Spawn(e.to_string()), ""))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        match output.status.code() {
            Some(0) => Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code: 0,
            }),
            Some(code) => {
                log::warn!("{} exited with status {}: {}", command.program, code, stderr.trim());
                Err(ExternalToolError::new(&command.program, ToolFailure::Exit(code), stderr))
            }
            None => {
                log::warn!("{} was terminated by a signal", command.program);
                Err(ExternalToolError::new(&command.program, ToolFailure::Signal, stderr))
            }
        }
    }
}

/// Resolves each configured tool on `PATH`, returning the ones that are missing.
pub fn missing_tools(tools: &ToolPaths) -> Vec<String> {
    [&tools.ytdlp, &tools.ffmpeg, &tools.mp4decrypt]
        .into_iter()
        .filter(|program| {
            let found: Option<PathBuf> = which::which(program.as_str()).ok();
            match found {
                Some(path) => {
                    log::debug!("Found {} at {}", program, path.display());
                    false
                }
                None => true,
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let output = ProcessRunner::new()
            .run(&sh("echo out; echo err >&2"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = ProcessRunner::new()
            .run(&sh("echo 'bad input' >&2; exit 3"))
            .await
            .unwrap_err();
        assert_eq!(err.program, "sh");
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.stderr.trim(), "bad input");
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let err = ProcessRunner::new()
            .run(&ToolCommand::new("definitely-not-a-real-tool-1234"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ToolFailure::Spawn(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_hung_tool() {
        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let err = runner.run(&sh("sleep 10")).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_tools_reports_unknown_programs() {
        let tools = ToolPaths {
            ytdlp: "definitely-not-a-real-tool-1234".to_string(),
            ffmpeg: "sh".to_string(),
            mp4decrypt: "sh".to_string(),
        };
        assert_eq!(missing_tools(&tools), vec!["definitely-not-a-real-tool-1234".to_string()]);
    }
}
