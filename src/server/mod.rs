//! HTTP surface: axum router, shared state and graceful shutdown.

mod form;
mod handlers;
mod response;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cancellation::RequestRegistry;
use crate::config::Config;
use crate::error::PipelineError;
use crate::metrics::MetricsRegistry;
use crate::ocr::{AzureReadClient, OcrProvider, OcrResultCache};
use crate::pipeline::OcrPipeline;
use crate::scheduler::BatchScheduler;
use crate::transcript::ClassifierChain;

pub use form::{parse_ocr_form, OcrForm, MAX_NAME_CHARS};
pub use response::{ApiError, ErrorBody, ErrorResponse, ImageResult, OcrResponse};

/// Shared application state for API handlers.
pub struct AppState {
    pub pipeline: Arc<OcrPipeline>,
    pub registry: Arc<RequestRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<OcrResultCache>,
    pub scheduler: Arc<BatchScheduler>,
    /// Color evidence first, layout fallback (`/api/ocr`).
    pub full_chain: Arc<ClassifierChain>,
    /// Declared side only (`/api/ocr/azure-clean`).
    pub position_chain: Arc<ClassifierChain>,
    pub max_images_per_request: usize,
    pub max_upload_bytes: usize,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the pipeline around an arbitrary provider.
    pub fn new(
        config: &Config,
        provider: Arc<dyn OcrProvider>,
        root: CancellationToken,
    ) -> Arc<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let scheduler = Arc::new(BatchScheduler::new(config.max_concurrency, Arc::clone(&metrics)));
        let cache = Arc::new(OcrResultCache::new(config.cache_capacity, config.cache_ttl));
        let pipeline = Arc::new(OcrPipeline::new(
            provider,
            Arc::clone(&scheduler),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            config.image_limits.clone(),
        ));

        Arc::new(Self {
            pipeline,
            registry: Arc::new(RequestRegistry::with_root(root)),
            metrics,
            cache,
            scheduler,
            full_chain: Arc::new(ClassifierChain::color_then_position()),
            position_chain: Arc::new(ClassifierChain::position_only()),
            max_images_per_request: config.max_images_per_request.max(1),
            max_upload_bytes: config.max_upload_bytes,
            started_at: Instant::now(),
        })
    }

    /// Production wiring against the Azure Read API.
    pub fn from_config(
        config: &Config,
        root: CancellationToken,
    ) -> Result<Arc<Self>, PipelineError> {
        let client = AzureReadClient::new(&config.azure, config.poll.clone())?;
        info!(
            endpoint = %config.azure.endpoint,
            poll_interval_ms = config.poll.interval.as_millis() as u64,
            max_poll_attempts = config.poll.max_attempts,
            "ocr_provider_configured"
        );
        Ok(Self::new(config, Arc::new(client), root))
    }
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/metrics", get(handlers::metrics))
        .route("/api/ocr", post(handlers::ocr))
        .route("/api/ocr/azure-clean", post(handlers::ocr_azure_clean))
        .route("/api/ocr/requests/{id}", get(handlers::request_status))
        .route("/api/ocr/requests/{id}/cancel", post(handlers::cancel_request))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight connections.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "http_server_listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
