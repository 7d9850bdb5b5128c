//! Azure Computer Vision Read (v3.2) client.
//! Submit image → 202 + Operation-Location → poll until `succeeded`/`failed`.
//! Connection pooling via reqwest, submit retry per status class, bounded
//! poll loop with transient backoff, cancellation at every await point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BoundingPolygon, OcrProvider, RawTextLine};
use crate::config::{AzureConfig, PollConfig};
use crate::error::PipelineError;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "operation-location";
const ANALYZE_PATH: &str = "/vision/v3.2/read/analyze";

/// Azure Read API client. Stateless across invocations apart from the
/// submission rate gate.
pub struct AzureReadClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_key: String,
    poll: PollConfig,
    /// Simple token-bucket: tracks the next allowed submission time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
}

impl AzureReadClient {
    pub fn new(config: &AzureConfig, poll: PollConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(poll.request_timeout)
            .build()
            .map_err(|e| PipelineError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            subscription_key: config.subscription_key.clone(),
            poll,
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
        })
    }

    fn analyze_url(&self) -> String {
        format!("{}{}", self.endpoint, ANALYZE_PATH)
    }

    /// Wait until the rate gate allows another submission. Fails without
    /// taking a slot when the gate would open after `deadline`.
    async fn rate_limit_wait(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let gate_closed = || {
            PipelineError::ProviderUnavailable("submission gate closed past deadline".into())
        };

        let lock = tokio::time::timeout_at(deadline, self.next_allowed.lock());
        let mut next = tokio::select! {
            r = lock => r.map_err(|_| gate_closed())?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        if *next > deadline {
            return Err(gate_closed());
        }
        tokio::select! {
            _ = tokio::time::sleep_until(*next) => {}
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }
        *next = Instant::now() + self.poll.min_submit_interval;
        Ok(())
    }

    /// Submit the image for analysis, returning the operation URL.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    /// A wait or request that would outlast `deadline` fails with
    /// `ProviderUnavailable` instead.
    async fn submit(
        &self,
        image: &[u8],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            self.rate_limit_wait(deadline, cancel).await?;

            let send = async {
                let resp = self
                    .http
                    .post(self.analyze_url())
                    .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(image.to_vec())
                    .send()
                    .await?;
                let status = resp.status();
                let headers = resp.headers().clone();
                let body = resp.text().await.unwrap_or_default();
                Ok::<_, reqwest::Error>((status, headers, body))
            };

            let result = tokio::select! {
                r = tokio::time::timeout_at(deadline, send) => match r {
                    Ok(r) => r,
                    Err(_) => {
                        warn!(attempt, "ocr_submit_deadline_exceeded");
                        return Err(PipelineError::ProviderUnavailable(
                            "analyze did not complete before the OCR deadline".into(),
                        ));
                    }
                },
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            };

            match result {
                Ok((status, headers, body)) if status.is_success() => {
                    let location = headers
                        .get(OPERATION_LOCATION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    return match location {
                        Some(url) => {
                            debug!(operation = %url, "ocr_submitted");
                            Ok(url)
                        }
                        None => Err(PipelineError::ProviderUnavailable(format!(
                            "analyze returned {status} without an Operation-Location header: {}",
                            truncate(&body)
                        ))),
                    };
                }
                Ok((status, _, body))
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
                {
                    error!(
                        status = status.as_u16(),
                        "OCR provider rejected credentials; check AZURE_VISION_KEY / endpoint"
                    );
                    return Err(PipelineError::ProviderAuth(provider_message(&body, status)));
                }
                Ok((status, headers, _)) if status == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= max_429_retries {
                        return Err(PipelineError::ProviderUnavailable(
                            "rate limited by OCR provider".into(),
                        ));
                    }
                    let wait = retry_after(&headers)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    if !fits_before(wait, deadline) {
                        warn!(
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            "429 backoff exceeds the OCR deadline, giving up"
                        );
                        return Err(PipelineError::ProviderUnavailable(
                            "rate limited by OCR provider past the OCR deadline".into(),
                        ));
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    sleep_or_cancel(wait, cancel).await?;
                    attempt += 1;
                }
                Ok((status, _, _)) if status.is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(PipelineError::ProviderUnavailable(format!(
                            "server error: {status}"
                        )));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    if !fits_before(wait, deadline) {
                        return Err(PipelineError::ProviderUnavailable(format!(
                            "server error: {status}, no time left to retry"
                        )));
                    }
                    warn!(
                        attempt,
                        status = status.as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    sleep_or_cancel(wait, cancel).await?;
                    attempt += 1;
                }
                Ok((status, _, body)) => return Err(classify_rejection(status, &body)),
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(PipelineError::ProviderUnavailable(
                            "analyze request timed out".into(),
                        ));
                    }
                    warn!("analyze request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(PipelineError::ProviderUnavailable(e.to_string())),
            }
        }
    }

    /// Poll the operation until it reaches a terminal state or the attempt
    /// budget / `deadline` runs out.
    async fn poll(
        &self,
        operation_url: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawTextLine>, PipelineError> {
        let mut last_error: Option<String> = None;
        let mut wait = self.poll.interval;

        for attempt in 1..=self.poll.max_attempts {
            if !fits_before(wait, deadline) {
                warn!(attempt, wait_ms = wait.as_millis() as u64, "ocr_poll_deadline_exceeded");
                return Err(PipelineError::Timeout {
                    attempts: attempt - 1,
                    last_error,
                });
            }
            sleep_or_cancel(wait, cancel).await?;
            wait = self.poll.interval;

            let fetch = async {
                let resp = self
                    .http
                    .get(operation_url)
                    .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
                    .send()
                    .await?;
                let status = resp.status();
                let headers = resp.headers().clone();
                let body = resp.bytes().await?;
                Ok::<_, reqwest::Error>((status, headers, body))
            };

            let result = tokio::select! {
                r = tokio::time::timeout_at(deadline, fetch) => match r {
                    Ok(r) => r,
                    Err(_) => {
                        warn!(attempt, "ocr_poll_deadline_exceeded");
                        return Err(PipelineError::Timeout {
                            attempts: attempt,
                            last_error,
                        });
                    }
                },
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            };

            match result {
                Ok((status, _, body)) if status.is_success() => {
                    let operation: ReadOperation = match serde_json::from_slice(&body) {
                        Ok(op) => op,
                        Err(e) => {
                            warn!(attempt, error = %e, "malformed poll response");
                            last_error = Some(format!("malformed poll response: {e}"));
                            continue;
                        }
                    };
                    match operation.status {
                        OperationStatus::Succeeded => {
                            let lines = extract_lines(operation.analyze_result);
                            info!(attempt, lines = lines.len(), "ocr_succeeded");
                            return Ok(lines);
                        }
                        OperationStatus::Failed => {
                            warn!(attempt, "ocr_operation_failed");
                            return Err(PipelineError::ProviderProcessingFailed(
                                "Read operation reported status `failed`".into(),
                            ));
                        }
                        OperationStatus::NotStarted | OperationStatus::Running => {
                            debug!(attempt, "ocr_operation_pending");
                        }
                        OperationStatus::Unknown => {
                            warn!(attempt, "unknown Read operation status, continuing to poll");
                        }
                    }
                }
                Ok((status, _, body))
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
                {
                    error!(
                        status = status.as_u16(),
                        "OCR provider rejected credentials while polling"
                    );
                    let body = String::from_utf8_lossy(&body);
                    return Err(PipelineError::ProviderAuth(provider_message(&body, status)));
                }
                Ok((status, _, _)) if status == StatusCode::NOT_FOUND => {
                    return Err(PipelineError::ProviderProcessingFailed(
                        "Read operation not found or expired".into(),
                    ));
                }
                Ok((status, headers, _))
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() =>
                {
                    wait = retry_after(&headers).unwrap_or(self.poll.transient_backoff);
                    warn!(
                        attempt,
                        status = status.as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "transient poll failure, backing off"
                    );
                    last_error = Some(format!("poll returned {status}"));
                }
                Ok((status, _, body)) => {
                    let body = String::from_utf8_lossy(&body);
                    return Err(PipelineError::ProviderProcessingFailed(format!(
                        "unexpected poll status {status}: {}",
                        truncate(&body)
                    )));
                }
                Err(e) => {
                    wait = self.poll.transient_backoff;
                    warn!(attempt, error = %e, "poll request failed, backing off");
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(attempts = self.poll.max_attempts, "ocr_poll_attempts_exhausted");
        Err(PipelineError::Timeout {
            attempts: self.poll.max_attempts,
            last_error,
        })
    }
}

#[async_trait]
impl OcrProvider for AzureReadClient {
    fn name(&self) -> &'static str {
        "azure-read-v3.2"
    }

    /// Submit and poll share one deadline, so no provider backoff can hold
    /// the OCR permit past `wall_clock_budget`.
    async fn recognize(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<RawTextLine>, PipelineError> {
        let deadline = Instant::now() + self.poll.wall_clock_budget();
        let operation_url = self.submit(image, deadline, cancel).await?;
        self.poll(&operation_url, deadline, cancel).await
    }
}

fn fits_before(wait: Duration, deadline: Instant) -> bool {
    Instant::now() + wait <= deadline
}

async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<(), PipelineError> {
    tokio::select! {
        _ = tokio::time::sleep(wait) => Ok(()),
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-retryable 4xx on submit to the pipeline taxonomy.
fn classify_rejection(status: StatusCode, body: &str) -> PipelineError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let code = parsed.as_ref().map(|e| e.error.code.as_str()).unwrap_or("");
    let message = provider_message(body, status);
    match code {
        "InvalidImageFormat" | "UnsupportedMediaType" => PipelineError::UnsupportedFormat(message),
        _ if status == StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            PipelineError::UnsupportedFormat(message)
        }
        _ => PipelineError::InvalidImage(message),
    }
}

fn provider_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{} ({})", envelope.error.message, envelope.error.code),
        Err(_) if body.trim().is_empty() => format!("status {status}"),
        Err(_) => format!("status {status}: {}", truncate(body)),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

fn extract_lines(result: Option<AnalyzeResult>) -> Vec<RawTextLine> {
    result
        .map(|r| r.read_results)
        .unwrap_or_default()
        .into_iter()
        .flat_map(|page| page.lines)
        .filter_map(|line| match BoundingPolygon::from_flat(&line.bounding_box) {
            Some(polygon) => Some(RawTextLine::new(line.text, polygon)),
            None => {
                warn!(len = line.bounding_box.len(), "dropping line with malformed bounding box");
                None
            }
        })
        .collect()
}

// --- Read API response types ---

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: OperationStatus,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadResult>,
}

#[derive(Deserialize)]
struct ReadResult {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadLine {
    text: String,
    bounding_box: Vec<f64>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ProviderErrorBody,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
