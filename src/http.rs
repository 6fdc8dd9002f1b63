//! HTTP surface: multipart upload in, prediction JSON out

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::error::{ErrorCategory, PredictError};
use crate::metrics;
use crate::prediction::{PredictionRequest, PredictionResult};
use crate::service::CropDiseaseService;

type ApiResponse = (StatusCode, Json<PredictionResult>);

pub fn router(service: Arc<CropDiseaseService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/predict", post(predict_handler))
        .route("/api/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn predict_handler(
    State(service): State<Arc<CropDiseaseService>>,
    mut multipart: Multipart,
) -> ApiResponse {
    let mut image = Vec::new();
    let mut notes = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    e.status(),
                    Json(PredictionResult::error(format!("Failed to process image: {}", e.body_text()))),
                )
            }
        };

        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => match field.bytes().await {
                Ok(bytes) => image = bytes.to_vec(),
                Err(e) => {
                    return (
                        e.status(),
                        Json(PredictionResult::error(format!("Failed to process image: {}", e.body_text()))),
                    )
                }
            },
            Some("notes") => match field.text().await {
                Ok(text) => notes = Some(text),
                Err(e) => debug!(error = %e, "Ignoring undecodable notes field"),
            },
            other => debug!(field = ?other, "Ignoring unknown multipart field"),
        }
    }

    match service.predict(PredictionRequest { image, notes }).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &PredictError) -> ApiResponse {
    let status = match err.category() {
        ErrorCategory::Input => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(PredictionResult::from_error(err)))
}

async fn health_handler() -> &'static str {
    "Backend is running!"
}

async fn metrics_handler() -> String {
    metrics::export_metrics()
}
