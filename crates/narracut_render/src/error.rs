use narracut_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Upper bound on the stderr tail carried by `ExternalToolFailure`.
pub const STDERR_LIMIT: usize = 4000;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to execute ffprobe: {0}")]
    FfprobeExec(String),

    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("ffmpeg not found")]
    FfmpegNotFound,

    #[error("command failed: {command}\n{stderr}")]
    ExternalToolFailure { command: String, stderr: String },

    #[error("no segments left after trimming")]
    NoUsableSegments,

    #[error("no audio source for segment {0}")]
    MissingAudioSource(String),

    #[error("timeline invariant violated: master is {total:.3}s but last segment ends at {last_end:.3}s")]
    TimelineInvariantViolation { total: f64, last_end: f64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("video {0} has not been processed yet")]
    NotProcessed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("script generation failed: {0}")]
    ScriptGeneration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Build a tool failure, keeping only the tail of stderr.
    pub fn tool_failure(command: impl Into<String>, stderr: &str) -> Self {
        Self::ExternalToolFailure {
            command: command.into(),
            stderr: truncate_tail(stderr.trim(), STDERR_LIMIT).to_string(),
        }
    }
}

fn truncate_tail(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

pub type Result<T> = std::result::Result<T, RenderError>;
