//! Service configuration loaded from environment variables.
//! Provider endpoint and key are mandatory; everything else has a default.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::preprocess::ImageLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Azure Computer Vision Read endpoint + credentials.
#[derive(Clone)]
pub struct AzureConfig {
    /// e.g. `https://my-resource.cognitiveservices.azure.com`
    pub endpoint: String,
    pub subscription_key: String,
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("endpoint", &self.endpoint)
            .field("subscription_key", &"<redacted>")
            .finish()
    }
}

/// Poll loop tuning for the asynchronous Read operation.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wait applied after a transient poll failure (429/5xx/network).
    pub transient_backoff: Duration,
    /// Per HTTP request timeout.
    pub request_timeout: Duration,
    /// Minimum spacing between analyze submissions.
    pub min_submit_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 60,
            transient_backoff: Duration::from_millis(3000),
            request_timeout: Duration::from_secs(30),
            min_submit_interval: Duration::from_millis(100),
        }
    }
}

impl PollConfig {
    /// Hard wall-clock bound for one recognition, submit retries included.
    pub fn wall_clock_budget(&self) -> Duration {
        self.interval * self.max_attempts + self.transient_backoff
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub azure: AzureConfig,
    pub poll: PollConfig,
    pub image_limits: ImageLimits,
    /// Process-wide cap on concurrent OCR submissions.
    pub max_concurrency: usize,
    pub max_images_per_request: usize,
    pub max_upload_bytes: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load configuration from a provided map (useful for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let endpoint = get("AZURE_VISION_ENDPOINT")
            .ok_or(ConfigError::Missing("AZURE_VISION_ENDPOINT"))?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "AZURE_VISION_ENDPOINT",
                value: endpoint.to_string(),
                reason: "must be an http(s) URL".into(),
            });
        }
        let subscription_key =
            get("AZURE_VISION_KEY").ok_or(ConfigError::Missing("AZURE_VISION_KEY"))?;

        let log_format = match get("LOG_FORMAT").map(str::to_ascii_lowercase).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected `json` or `pretty`".into(),
                })
            }
        };

        let defaults = PollConfig::default();
        let poll = PollConfig {
            interval: Duration::from_millis(parse_or(
                vars,
                "OCR_POLL_INTERVAL_MS",
                defaults.interval.as_millis() as u64,
            )?),
            max_attempts: parse_or(vars, "OCR_MAX_POLL_ATTEMPTS", defaults.max_attempts)?,
            transient_backoff: Duration::from_millis(parse_or(
                vars,
                "OCR_TRANSIENT_BACKOFF_MS",
                defaults.transient_backoff.as_millis() as u64,
            )?),
            ..defaults
        };
        if poll.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "OCR_MAX_POLL_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let max_concurrency: usize = parse_or(vars, "OCR_MAX_CONCURRENCY", 4)?;
        let cache_capacity: usize = parse_or(vars, "OCR_CACHE_CAPACITY", 128)?;

        Ok(Self {
            bind_address: get("DRAMA_OCR_BIND").unwrap_or("0.0.0.0").to_string(),
            port: parse_or(vars, "DRAMA_OCR_PORT", 8080)?,
            log_level: get("RUST_LOG").unwrap_or("info").to_string(),
            log_format,
            azure: AzureConfig {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                subscription_key: subscription_key.to_string(),
            },
            poll,
            image_limits: ImageLimits::default(),
            max_concurrency: max_concurrency.max(1),
            max_images_per_request: parse_or(vars, "OCR_MAX_IMAGES_PER_REQUEST", 10)?,
            max_upload_bytes: parse_or(vars, "OCR_MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
            cache_capacity: cache_capacity.max(1),
            cache_ttl: Duration::from_secs(parse_or(vars, "OCR_CACHE_TTL_SECS", 600)?),
        })
    }
}

fn parse_or<T>(
    vars: &HashMap<String, String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(var).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}
