use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub llama_server: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate health: this process answers, and so does the inference server.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.backend.probe().await;

    if report.healthy {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                llama_server: true,
                method: report.method,
                error: None,
            }),
        )
    } else {
        tracing::debug!("Inference server unhealthy: {:?}", report.error);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                llama_server: false,
                method: None,
                error: report.error,
            }),
        )
    }
}
