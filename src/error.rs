//! Prediction error taxonomy
//!
//! Every failure the orchestrator can surface, grouped into the four
//! categories callers act on (input, resource, process, parse).

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No image provided")]
    EmptyInput,

    #[error("Ephemeral artifact error: {operation} failed: {source}")]
    Artifact {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Inference script not found: {0}")]
    ScriptNotFound(String),

    #[error("Failed to launch inference process {executable}: {source}")]
    ProcessLaunch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inference process failed with exit code: {}", fmt_exit_code(.code))]
    ProcessFailure { code: Option<i32> },

    #[error("I/O error while talking to inference process: {0}")]
    ProcessIo(#[source] std::io::Error),

    #[error("Inference process was interrupted")]
    ProcessInterrupted,

    #[error("Inference process exceeded timeout of {timeout:?}")]
    ProcessTimeout { timeout: std::time::Duration },

    #[error("Inference routine reported an error: {0}")]
    RoutineReportedError(String),

    #[error("No output received from inference process")]
    EmptyOutput,

    #[error("Malformed output from inference process: {0}")]
    MalformedOutput(String),

    #[error("Unexpected output format from inference process: {line} ({fields} fields)")]
    UnexpectedFieldCount { line: String, fields: usize },
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

/// Caller-facing classification of a [`PredictError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Empty or invalid image; retrying will not help
    Input,
    /// Script, model or temp storage unavailable; fatal until fixed
    Resource,
    /// Launch failure, non-zero exit, interruption or timeout
    Process,
    /// Routine output violates the line contract
    Parse,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Process => "process",
            ErrorCategory::Parse => "parse",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PredictError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PredictError::EmptyInput => ErrorCategory::Input,
            PredictError::Artifact { .. }
            | PredictError::ModelNotFound(_)
            | PredictError::ScriptNotFound(_) => ErrorCategory::Resource,
            PredictError::ProcessLaunch { .. }
            | PredictError::ProcessFailure { .. }
            | PredictError::ProcessIo(_)
            | PredictError::ProcessInterrupted
            | PredictError::ProcessTimeout { .. }
            | PredictError::RoutineReportedError(_) => ErrorCategory::Process,
            PredictError::EmptyOutput
            | PredictError::MalformedOutput(_)
            | PredictError::UnexpectedFieldCount { .. } => ErrorCategory::Parse,
        }
    }

    /// Whether a caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Process
    }

    pub(crate) fn artifact(operation: impl Into<String>, source: std::io::Error) -> Self {
        PredictError::Artifact {
            operation: operation.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PredictError>;
