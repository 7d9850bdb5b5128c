//! Pipeline error taxonomy.
//! Every failure that aborts an image maps to one `ErrorKind`, an HTTP status
//! and a retry hint for the caller.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Stable, serializable error category surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidImage,
    UnsupportedFormat,
    ProviderAuthError,
    ProviderProcessingFailed,
    ProviderUnavailable,
    Timeout,
    Cancelled,
    BadRequest,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidImage => "InvalidImage",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::ProviderAuthError => "ProviderAuthError",
            ErrorKind::ProviderProcessingFailed => "ProviderProcessingFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Hard failures that abort processing of one image.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("OCR provider rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("OCR provider failed to process the image: {0}")]
    ProviderProcessingFailed(String),

    #[error("OCR provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("OCR timed out after {attempts} poll attempts{}", last_error_suffix(.last_error))]
    Timeout {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A worker task died (panic in decoding or classification).
    #[error("internal error: {0}")]
    Internal(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidImage(_) => ErrorKind::InvalidImage,
            PipelineError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            PipelineError::ProviderAuth(_) => ErrorKind::ProviderAuthError,
            PipelineError::ProviderProcessingFailed(_) => ErrorKind::ProviderProcessingFailed,
            PipelineError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::BadRequest(_) => ErrorKind::BadRequest,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-submitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProviderUnavailable | ErrorKind::Timeout | ErrorKind::Cancelled
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidImage => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::ProviderAuthError | ErrorKind::ProviderProcessingFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // 499: client closed request (nginx convention)
            ErrorKind::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures while bringing the service up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("failed to build OCR provider client: {0}")]
    Provider(#[from] PipelineError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
