//! REST front door for the pipeline
//!
//! A thin adapter: every report request becomes one `run_pipeline` call.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ErrorClass;
use crate::models::RunResult;
use crate::orchestrator::PipelineOrchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReportRequest {
    pub request: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Failed runs still carry their `RunResult` so callers can see the trace.
    pub fn failure<T: Serialize>(message: String, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::error(message)
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<PipelineOrchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let ready = state.orchestrator.is_ready();
    Json(serde_json::json!({
        "status": if ready { "healthy" } else { "degraded" },
        "model_ready": ready,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Report Endpoint
/// =============================

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Briefing | ErrorClass::SchemaValidation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Invocation => StatusCode::BAD_GATEWAY,
        ErrorClass::Cancelled | ErrorClass::Synthesis | ErrorClass::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn create_report(
    State(state): State<ApiState>,
    Json(req): Json<ReportRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let request = req.request.trim();
    if request.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("request must not be empty".into())),
        );
    }

    info!("Received report request: {}", request);

    let result = state.orchestrator.run_pipeline(request).await;
    match &result {
        RunResult::Completed(_) => (StatusCode::OK, Json(ApiResponse::success(&result))),
        RunResult::Failed(run) => (
            status_for(run.class),
            Json(ApiResponse::failure(
                format!("Report generation failed: {}", run.message),
                &result,
            )),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<PipelineOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/reports", post(create_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<PipelineOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
