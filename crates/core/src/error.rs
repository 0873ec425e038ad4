//! Error taxonomy for the subtitle pipeline.
//!
//! Failures with a safe local default (missing font, a single failed
//! translation) never reach these types; they are absorbed where they happen.
//! Everything here ends a job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external service call (transcription or translation).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExternalError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ExternalError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. } | Self::Transport(_)
        )
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server {
                status,
                message: body.into(),
            },
            _ => Self::Rejected(format!("{status}: {}", body.into())),
        }
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured limit on the error
            Self::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors raised by the ffmpeg/ffprobe layer.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("ffmpeg failed: {message}")]
    FfmpegFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("no video stream in {0}")]
    NoVideoStream(String),

    #[error("output duration {actual:.3}s differs from source {expected:.3}s")]
    DurationMismatch { expected: f64, actual: f64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Job-level error class, as reported to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InputError,
    FatalExternalError,
    EncodeError,
    ResourceError,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InputError => "InputError",
            Self::FatalExternalError => "FatalExternalError",
            Self::EncodeError => "EncodeError",
            Self::ResourceError => "ResourceError",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Error that terminates a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("{service} failed after {attempts} attempt(s): {source}")]
    FatalExternal {
        service: &'static str,
        attempts: u32,
        #[source]
        source: ExternalError,
    },

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("resource error: {0}")]
    Resource(#[from] std::io::Error),

    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Class of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::FatalExternal { .. } => ErrorKind::FatalExternalError,
            Self::Encode(_) => ErrorKind::EncodeError,
            Self::Resource(_) => ErrorKind::ResourceError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Collapse into the structured form handed to the caller.
    pub fn to_failure(&self) -> JobFailure {
        let mut message = self.to_string();
        if message.len() > MAX_FAILURE_MESSAGE {
            let mut cut = MAX_FAILURE_MESSAGE;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        JobFailure {
            kind: self.kind(),
            message,
        }
    }
}

impl From<MediaError> for JobError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::Io(io) => Self::Resource(io),
            MediaError::NoVideoStream(_) => Self::Input(err.to_string()),
            other => Self::Encode(other.to_string()),
        }
    }
}

const MAX_FAILURE_MESSAGE: usize = 200;

/// Structured job error: a kind plus a short message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Rejection at submission time. Nothing was started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("all {capacity} job slot(s) are busy, try again later")]
    PoolFull { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            ExternalError::from_status(429, "", None),
            ExternalError::RateLimited { .. }
        ));
        assert!(ExternalError::from_status(503, "busy", None).is_retryable());
        let rejected = ExternalError::from_status(401, "bad key", None);
        assert!(!rejected.is_retryable());
        assert!(!ExternalError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn maps_media_errors_to_job_kinds() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(JobError::from(MediaError::Io(io)).kind(), ErrorKind::ResourceError);
        assert_eq!(JobError::from(MediaError::Cancelled).kind(), ErrorKind::Cancelled);
        let ffmpeg = MediaError::FfmpegFailed {
            message: "x".into(),
            exit_code: Some(1),
        };
        assert_eq!(JobError::from(ffmpeg).kind(), ErrorKind::EncodeError);
    }

    #[test]
    fn failure_message_is_short() {
        let err = JobError::Input("é".repeat(400));
        let failure = err.to_failure();
        assert_eq!(failure.kind, ErrorKind::InputError);
        assert!(failure.message.len() <= MAX_FAILURE_MESSAGE);
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"InputError\""));
    }
}
