//! Error types for each stage of a render job and for the HTTP surface.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Remote download failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("bad status {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("download request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duration probe failures. Never leave the probe; it substitutes a default instead.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe could not be started: {0}")]
    Spawn(std::io::Error),

    #[error("ffprobe exited with {status}: {stderr}")]
    Failed { status: std::process::ExitStatus, stderr: String },

    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unparseable duration {0:?}")]
    Parse(String),
}

/// Render tool failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("ffmpeg could not be started: {0}")]
    Spawn(std::io::Error),

    #[error("ffmpeg exited with {status}")]
    Failed { status: std::process::ExitStatus, stderr: String },

    #[error("ffmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Diagnostic output of the tool, when there is any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RenderError::Failed { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

/// Job registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    Duplicate(String),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: &'static str, to: &'static str },

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A pipeline stage that ended the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{asset} download failed: {source}")]
    Fetch { asset: &'static str, #[source] source: FetchError },

    #[error("render failed: {0}")]
    Render(#[from] RenderError),
}

impl PipelineError {
    /// Message stored on the job; diagnostic detail stays in the logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } => "Download failed",
            PipelineError::Render(_) => "Processing failed",
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::not_found("Job not found"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorEnvelope { status: "error", message })).into_response()
    }
}
