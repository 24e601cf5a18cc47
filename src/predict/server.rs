//! HTTP front end for [`PredictionPipeline`]
//!
//! Routes:
//!
//! - `GET /` upload form
//! - `POST /predict` raw image bytes in, `[{"image": "<label>"}]` out
//! - `GET /health`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{Error, Result};

use super::PredictionPipeline;

/// Uploads larger than this are rejected with 413
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Kidney CT Scan Classifier</title>
<style>
  body { font-family: sans-serif; max-width: 640px; margin: 2rem auto; color: #222; }
  h1 { text-align: center; }
  #preview { display: none; max-width: 100%; margin: 1rem 0; border-radius: 6px; }
  button { padding: 0.5rem 1.5rem; }
  .result { font-size: 1.4rem; font-weight: bold; padding: 0.8rem; border-radius: 6px; text-align: center; }
  .Normal { background: #e3f6e5; color: #1b5e20; }
  .Tumor { background: #fdecea; color: #b71c1c; }
  .error { background: #fff4e5; color: #8a4b00; }
</style>
</head>
<body>
<h1>Kidney CT Scan Classifier</h1>
<p>Upload a kidney CT scan image to check whether it looks Normal or shows a Tumor.</p>
<form id="upload">
  <input type="file" id="file" accept="image/png,image/jpeg,image/bmp">
  <button type="submit">Predict</button>
</form>
<img id="preview" alt="Uploaded scan">
<div id="result"></div>
<script>
const input = document.getElementById("file");
const preview = document.getElementById("preview");
const result = document.getElementById("result");
input.addEventListener("change", () => {
  const file = input.files[0];
  if (!file) { return; }
  preview.src = URL.createObjectURL(file);
  preview.style.display = "block";
  result.className = "";
  result.textContent = "";
});
document.getElementById("upload").addEventListener("submit", async (event) => {
  event.preventDefault();
  const file = input.files[0];
  if (!file) { return; }
  const response = await fetch("/predict", { method: "POST", body: file });
  const body = await response.json();
  if (response.ok) {
    const label = body[0].image;
    result.className = "result " + label;
    result.textContent = "Prediction: " + label;
  } else {
    result.className = "result error";
    result.textContent = body.error;
  }
});
</script>
</body>
</html>
"#;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<PredictionPipeline>,
}

/// Build the router around a loaded pipeline
pub fn router(pipeline: Arc<PredictionPipeline>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict))
        .route("/health", get(health_check))
        .with_state(AppState { pipeline })
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Serve until the process is stopped
pub async fn serve(address: SocketAddr, pipeline: Arc<PredictionPipeline>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Prediction server listening on http://{address}");
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "request body must contain an image".to_string());
    }

    let pipeline = Arc::clone(&state.pipeline);
    let outcome = tokio::task::spawn_blocking(move || pipeline.predict_bytes(&body)).await;
    match outcome {
        Ok(Ok(records)) => (StatusCode::OK, Json(records)).into_response(),
        Ok(Err(e @ Error::Image(_))) => failure(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(e)) => {
            error!("Prediction failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("Prediction task panicked: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "prediction task failed".to_string())
        }
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}
