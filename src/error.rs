//! Error types for settings, configuration and the processing pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// How an external tool failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    /// Process exited with a non-zero status.
    Exit(i32),
    /// Process was terminated by a signal.
    Signal,
    /// Process exceeded the configured timeout and was killed.
    Timeout(Duration),
    /// Process could not be started at all.
    Spawn(String),
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Exit(code) => write!(f, "exited with status {}", code),
            ToolFailure::Signal => write!(f, "was killed by a signal"),
            ToolFailure::Timeout(after) => write!(f, "timed out after {:?}", after),
            ToolFailure::Spawn(reason) => write!(f, "could not be started: {}", reason),
        }
    }
}

/// Failure of an external process (downloader, decryptor or encoder).
#[derive(Debug, Clone, Error)]
#[error("{program} {kind}")]
pub struct ExternalToolError {
    pub program: String,
    pub kind: ToolFailure,
    pub stderr: String,
}

impl ExternalToolError {
    pub fn new(program: impl Into<String>, kind: ToolFailure, stderr: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            kind,
            stderr: stderr.into(),
        }
    }

    /// Exit code, when the process ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            ToolFailure::Exit(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ToolFailure::Timeout(_))
    }
}

/// Errors that abort a single job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),

    #[error("no {0} file was produced by the download stage")]
    MissingArtifact(&'static str),

    #[error("final output was not created: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Diagnostic output captured from the failing tool, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            PipelineError::ExternalTool(err) if !err.stderr.trim().is_empty() => {
                Some(err.stderr.as_str())
            }
            _ => None,
        }
    }
}

/// Failure moving a file between Telegram or the web and the work directory.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("message has no video")]
    NoVideo,

    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("file download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A user-supplied setting value was rejected; the store is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationValueError {
    #[error("{field}: `{value}` is not a whole number")]
    NotANumber { field: &'static str, value: String },

    #[error("{field}: {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{field}: unknown choice `{value}` (expected one of: {expected})")]
    UnknownChoice {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{0}: value must not be empty")]
    Empty(&'static str),
}

/// Invalid process configuration read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value `{value}`")]
    Invalid { key: &'static str, value: String },

    #[error("{key}: {source}")]
    Setting {
        key: &'static str,
        #[source]
        source: ConfigurationValueError,
    },

    #[error("settings file {}: {source}", path.display())]
    SettingsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {}: {source}", path.display())]
    SettingsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
