//! JSON bodies returned by the OCR endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::{ImageOutcome, PipelineStats};
use crate::transcript::ExtractedMessage;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&PipelineError> for ErrorBody {
    fn from(e: &PipelineError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResult {
    pub success: bool,
    pub messages: Vec<ExtractedMessage>,
    pub conversation_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PipelineStats>,
}

impl From<Result<ImageOutcome, PipelineError>> for ImageResult {
    fn from(result: Result<ImageOutcome, PipelineError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                conversation_text: outcome.transcript.to_conversation_text(),
                messages: outcome.transcript.messages,
                info: outcome.info,
                error: None,
                stats: Some(outcome.stats),
            },
            Err(e) => Self {
                success: false,
                messages: Vec::new(),
                conversation_text: String::new(),
                info: None,
                error: Some(ErrorBody::from(&e)),
                stats: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResponse {
    pub success: bool,
    pub request_id: String,
    pub results: Vec<ImageResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub request_id: String,
    pub error: ErrorBody,
    /// Per-image detail when every image of a batch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ImageResult>>,
}

/// A request-level failure rendered with its mapped status code.
#[derive(Debug)]
pub struct ApiError {
    pub request_id: String,
    pub error: PipelineError,
    pub results: Option<Vec<ImageResult>>,
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, error: PipelineError) -> Self {
        Self {
            request_id: request_id.into(),
            error,
            results: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        match self.error.kind() {
            ErrorKind::ProviderAuthError => {
                error!(request_id = %self.request_id, error = %self.error, "provider_auth_failed")
            }
            ErrorKind::Internal => {
                error!(request_id = %self.request_id, error = %self.error, "request_internal_error")
            }
            _ => warn!(
                request_id = %self.request_id,
                kind = %self.error.kind(),
                error = %self.error,
                "request_failed"
            ),
        }
        let body = ErrorResponse {
            success: false,
            request_id: self.request_id,
            error: ErrorBody::from(&self.error),
            results: self.results,
        };
        (status, Json(body)).into_response()
    }
}

/// Single image: its error is the request error. Batch: success unless
/// every image failed, in which case the first failure sets the status.
pub fn build_ocr_response(
    request_id: &str,
    results: Vec<Result<ImageOutcome, PipelineError>>,
) -> Response {
    let first_error = results.iter().find_map(|r| r.as_ref().err()).cloned();
    let all_failed = results.iter().all(|r| r.is_err());

    match first_error {
        Some(error) if all_failed => {
            let results = (results.len() > 1)
                .then(|| results.into_iter().map(ImageResult::from).collect());
            ApiError {
                request_id: request_id.to_string(),
                error,
                results,
            }
            .into_response()
        }
        _ => (
            StatusCode::OK,
            Json(OcrResponse {
                success: true,
                request_id: request_id.to_string(),
                results: results.into_iter().map(ImageResult::from).collect(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Transcript;

    fn ok_outcome() -> Result<ImageOutcome, PipelineError> {
        Ok(ImageOutcome {
            transcript: Transcript::default(),
            info: None,
            stats: PipelineStats::default(),
        })
    }

    #[test]
    fn single_failure_uses_mapped_status() {
        let resp = build_ocr_response(
            "req-1",
            vec![Err(PipelineError::Timeout { attempts: 60, last_error: None })],
        );
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn partial_batch_failure_is_a_success() {
        let resp = build_ocr_response(
            "req-2",
            vec![ok_outcome(), Err(PipelineError::InvalidImage("truncated".into()))],
        );
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn error_body_shape() {
        let body = serde_json::to_value(ErrorResponse {
            success: false,
            request_id: "req-3".into(),
            error: ErrorBody::from(&PipelineError::ProviderUnavailable("server error: 503".into())),
            results: None,
        })
        .unwrap();
        assert_eq!(body["requestId"], "req-3");
        assert_eq!(body["error"]["kind"], "ProviderUnavailable");
        assert_eq!(body["error"]["retryable"], true);
        assert!(body.get("results").is_none());
    }
}
