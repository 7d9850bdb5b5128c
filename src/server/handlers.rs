use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tracing::{info, info_span, Instrument};

use super::form::parse_ocr_form;
use super::response::{build_ocr_response, ApiError};
use super::AppState;
use crate::transcript::ClassifierChain;

/// Health check endpoint.
pub(super) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "drama-ocr",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.pipeline.provider_name(),
        "inflightRequests": state.registry.len(),
        "availableOcrSlots": state.scheduler.available_slots(),
        "cachedResults": state.cache.len(),
        "classifiers": {
            "ocr": state.full_chain.stage_names(),
            "azureClean": state.position_chain.stage_names(),
        },
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// Latency percentiles per pipeline stage, plus event counters.
pub(super) async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "metrics": state.metrics.summary(),
        "counters": state.metrics.counters(),
    }))
}

/// Full pipeline: color evidence, layout fallback.
pub(super) async fn ocr(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let chain = Arc::clone(&state.full_chain);
    run_ocr(state, multipart, chain, "ocr").await
}

/// Layout-only pipeline: trusts the declared side.
pub(super) async fn ocr_azure_clean(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Response {
    let chain = Arc::clone(&state.position_chain);
    run_ocr(state, multipart, chain, "azure-clean").await
}

async fn run_ocr(
    state: Arc<AppState>,
    multipart: Multipart,
    chain: Arc<ClassifierChain>,
    route: &'static str,
) -> Response {
    let form = match parse_ocr_form(multipart, state.max_images_per_request).await {
        Ok(form) => form,
        Err(e) => return ApiError::new(uuid::Uuid::new_v4().to_string(), e).into_response(),
    };

    // Dropping the guard (client disconnect) cancels every image of the request.
    let guard = state.registry.register(form.images.len());
    let span = info_span!(
        "ocr_request",
        request_id = %guard.request_id(),
        generation = guard.ids().generation,
        route,
    );

    async {
        info!(
            images = form.images.len(),
            side = ?form.mapping.my_side,
            "ocr_request_received"
        );
        let results = state
            .pipeline
            .process_batch(form.images, chain, &form.mapping, &guard)
            .await;
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(succeeded, total = results.len(), "ocr_request_finished");
        build_ocr_response(guard.request_id(), results)
    }
    .instrument(span)
    .await
}

/// Live stage of each image of an in-flight request.
pub(super) async fn request_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    match state.registry.snapshot(&request_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => unknown_request(&request_id),
    }
}

pub(super) async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    if state.registry.cancel(&request_id) {
        (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "requestId": request_id, "cancelled": true })),
        )
            .into_response()
    } else {
        unknown_request(&request_id)
    }
}

fn unknown_request(request_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "requestId": request_id,
            "error": "no in-flight request with this id",
        })),
    )
        .into_response()
}
