//! Probe endpoints; mounted outside authentication.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::server::AppState;
use crate::health::SystemHealth;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Full component report. Unhealthy components turn the response into a 503.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = match &state.health_checker {
        Some(checker) => checker.check_all().await,
        None => SystemHealth::from_components(Default::default(), state.start_time.elapsed()),
    };

    let code = if health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

/// Readiness: every backing service answered its probe.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match &state.health_checker {
        Some(checker) if !checker.check_ready().await => {
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
        _ => (StatusCode::OK, "ready"),
    }
}

/// Liveness: the process is responsive.
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": state.start_time.elapsed().as_secs(),
        })),
    )
}
