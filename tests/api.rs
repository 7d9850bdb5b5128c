//! End-to-end: real router + Azure client against an in-process mock of the
//! Read API.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use drama_ocr::config::Config;
use drama_ocr::server::{self, AppState};

struct MockRead {
    base_url: String,
    poll_body: Value,
    polls: AtomicUsize,
}

async fn analyze(State(mock): State<Arc<MockRead>>) -> Response {
    let mut resp = StatusCode::ACCEPTED.into_response();
    let location = format!("{}/vision/v3.2/read/analyzeResults/op-1", mock.base_url);
    resp.headers_mut()
        .insert("Operation-Location", HeaderValue::from_str(&location).unwrap());
    resp
}

async fn operation(State(mock): State<Arc<MockRead>>) -> Json<Value> {
    mock.polls.fetch_add(1, Ordering::SeqCst);
    Json(mock.poll_body.clone())
}

async fn spawn_mock_read(poll_body: Value) -> Arc<MockRead> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mock = Arc::new(MockRead {
        base_url: format!("http://{}", listener.local_addr().unwrap()),
        poll_body,
        polls: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/vision/v3.2/read/analyze", post(analyze))
        .route("/vision/v3.2/read/analyzeResults/{id}", get(operation))
        .with_state(Arc::clone(&mock));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    mock
}

/// Starts the service against `mock`, returns its base URL.
async fn spawn_service(mock: &MockRead) -> String {
    let vars: HashMap<String, String> = [
        ("AZURE_VISION_ENDPOINT", mock.base_url.as_str()),
        ("AZURE_VISION_KEY", "integration-key"),
        ("OCR_POLL_INTERVAL_MS", "5"),
        ("OCR_MAX_POLL_ATTEMPTS", "20"),
        ("OCR_TRANSIENT_BACKOFF_MS", "200"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let config = Config::from_vars(&vars).unwrap();

    let state = AppState::from_config(&config, CancellationToken::new()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(server::serve(listener, state, CancellationToken::new()));
    base
}

fn white_png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn image_part(bytes: Vec<u8>) -> Part {
    Part::bytes(bytes)
        .file_name("screenshot.png")
        .mime_str("image/png")
        .unwrap()
}

fn two_line_chat() -> Value {
    json!({
        "status": "succeeded",
        "analyzeResult": {
            "readResults": [{
                "page": 1,
                "lines": [
                    { "text": "10:32", "boundingBox": [500, 120, 580, 120, 580, 150, 500, 150] },
                    { "text": "Hey, you free later?", "boundingBox": [40, 300, 380, 300, 380, 336, 40, 336] },
                    { "text": "Yeah after 6", "boundingBox": [700, 420, 950, 420, 950, 456, 700, 456] }
                ]
            }]
        }
    })
}

#[tokio::test]
async fn transcript_with_speakers_by_side() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;

    let form = Form::new()
        .part("image", image_part(white_png(1080, 800)))
        .text("messageSide", "RIGHT")
        .text("myName", "Sam")
        .text("theirName", "Ali");
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["requestId"].as_str().is_some());
    let result = &body["results"][0];
    assert_eq!(
        result["messages"],
        json!([
            { "text": "Hey, you free later?", "speaker": "Ali" },
            { "text": "Yeah after 6", "speaker": "Sam" }
        ])
    );
    assert_eq!(result["conversationText"], "Ali: Hey, you free later?\nSam: Yeah after 6");
    assert_eq!(result["stats"]["noiseDropped"], 1);
}

#[tokio::test]
async fn failed_operation_is_a_bad_gateway() {
    let mock = spawn_mock_read(json!({ "status": "failed" })).await;
    let base = spawn_service(&mock).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr/azure-clean"))
        .multipart(Form::new().part("image", image_part(white_png(400, 800))))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "ProviderProcessingFailed");
    assert_eq!(body["error"]["retryable"], false);
    assert_eq!(mock.polls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_text_is_an_empty_success() {
    let mock = spawn_mock_read(json!({
        "status": "succeeded",
        "analyzeResult": { "readResults": [{ "page": 1, "lines": [] }] }
    }))
    .await;
    let base = spawn_service(&mock).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(Form::new().part("image", image_part(white_png(400, 800))))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["success"], true);
    assert_eq!(body["results"][0]["messages"], json!([]));
    assert_eq!(body["results"][0]["info"], "No text detected in image");
}

#[tokio::test]
async fn missing_image_is_a_bad_request() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(Form::new().text("messageSide", "LEFT"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "BadRequest");
}

#[tokio::test]
async fn invalid_message_side_is_a_bad_request() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;

    let form = Form::new()
        .part("image", image_part(white_png(400, 800)))
        .text("messageSide", "UP");
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn batch_reports_failures_per_image() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;

    let form = Form::new()
        .part("image", image_part(white_png(1080, 800)))
        .part("image", image_part(vec![0x42; 512]));
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["success"], true);
    assert_eq!(body["results"][1]["success"], false);
    assert_eq!(body["results"][1]["error"]["kind"], "UnsupportedFormat");
}

#[tokio::test]
async fn unsupported_single_image_maps_to_415() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/ocr"))
        .multipart(Form::new().part("image", image_part(vec![0x42; 512])))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 415);
    assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_and_unknown_request() {
    let mock = spawn_mock_read(two_line_chat()).await;
    let base = spawn_service(&mock).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["provider"], "azure-read-v3.2");
    assert_eq!(health["classifiers"]["ocr"], json!(["color", "position"]));
    assert_eq!(health["classifiers"]["azureClean"], json!(["position"]));

    let status = client
        .get(format!("{base}/api/ocr/requests/not-a-request"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 404);

    let cancel = client
        .post(format!("{base}/api/ocr/requests/not-a-request/cancel"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(cancel, 404);
}
