//! HTTP surface: job creation, status polling, output download and health.

use crate::config::Config;
use crate::error::{ApiError, ApiResult, FetchError};
use crate::jobs::{Job, JobRegistry};
use crate::pipeline::Orchestrator;
use crate::types::{CreateReelRequest, HealthResponse, RenderRequest, SubmitResponse};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<JobRegistry>) -> Result<Self, FetchError> {
        let orchestrator = Orchestrator::new(config.clone(), registry.clone())?;
        Ok(Self { config, registry, orchestrator })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/create-reel", post(create_reel))
        .route("/job-status/:job_id", get(job_status))
        .route("/outputs/:filename", get(get_output))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(600));

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

/// Base for URLs handed back to clients.
fn public_base(config: &Config, headers: &HeaderMap) -> String {
    if let Some(base) = &config.public_base_url {
        return base.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// Check required fields and resolve the duration ceiling.
pub fn validate(req: CreateReelRequest, default_max: f64) -> ApiResult<RenderRequest> {
    let video_id = req.video_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let music_id = req.music_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(video_id), Some(music_id)) = (video_id, music_id) else {
        return Err(ApiError::validation("Missing videoId or musicId"));
    };
    let max_duration = match req.max_duration {
        None => default_max,
        // Non-positive ceilings reach the duration floor and render at the fallback length.
        Some(v) if v.is_finite() => v,
        Some(_) => return Err(ApiError::validation("maxDuration must be a number")),
    };
    Ok(RenderRequest { video_id, music_id, overlays: req.overlays, max_duration })
}

async fn create_reel(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateReelRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(req) = body.map_err(|e| ApiError::validation(format!("Invalid request body: {}", e.body_text())))?;
    let request = validate(req, state.config.max_duration_secs)?;

    let base = public_base(&state.config, &headers);
    let job_id = state.orchestrator.submit(request, base.clone()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "processing".into(),
            status_url: format!("{base}/job-status/{job_id}"),
            job_id,
        }),
    ))
}

async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    state.registry.sweep(Utc::now()).await;
    Ok(Json(state.registry.get(&job_id).await?))
}

async fn get_output(State(state): State<AppState>, Path(filename): Path<String>) -> ApiResult<Response> {
    if filename.is_empty() || filename.contains(|c: char| c == '/' || c == '\\') || filename.contains("..") {
        return Err(ApiError::not_found("File not found"));
    }
    let path = state.config.output_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::not_found("File not found")),
        Err(e) => return Err(ApiError::Internal(format!("reading {}: {e}", path.display()))),
    };
    debug!(file = %filename, bytes = bytes.len(), "serving output");
    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"))], bytes).into_response())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_jobs: state.registry.active_count().await,
        timestamp: Utc::now().to_rfc3339(),
    })
}
