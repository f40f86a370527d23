//! HTTP surface: `POST /match` and `GET /health`.

use crate::error::ApiError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use facematch_core::{MatchPipeline, MatchRequest};
use serde::Serialize;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<MatchPipeline>,
}

impl AppState {
    pub fn new(pipeline: MatchPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub matches: Vec<String>,
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/match", post(match_faces))
        .route("/health", get(health))
        // axum's own multipart cap is lifted; the tower-http layer owns the limit
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Multipart fields: `guestPhoto` (file), `eventFolder`, `email`.
async fn match_faces(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MatchResponse>, ApiError> {
    let mut request = MatchRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to parse multipart: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "guestPhoto" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read guestPhoto: {e}")))?;
                request.probe = Some(data.to_vec());
            }
            "eventFolder" => {
                request.gallery = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("failed to read eventFolder: {e}"))
                })?);
            }
            "email" => {
                request.destination = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("failed to read email: {e}")))?,
                );
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.run(request))
        .await
        .map_err(|e| ApiError::internal(format!("match task failed: {e}")))??;

    Ok(Json(MatchResponse {
        matches: outcome.matches,
    }))
}
