//! `POST /notify`.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthUser;
use crate::api::models::NotifyResponse;
use crate::api::server::AppState;
use crate::ingress::NotifyRequest;

pub fn router() -> Router<AppState> {
    Router::new().route("/notify", post(notify))
}

/// Queue a notification for the authenticated user.
///
/// The body is parsed leniently so that validation can report every bad
/// field; a body that is not JSON at all is rejected with 400.
async fn notify(
    State(state): State<AppState>,
    user: AuthUser,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<NotifyResponse>)> {
    let ingress = state
        .ingress
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Ingress not configured"))?;

    let request: NotifyRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;

    let receipt = ingress.submit(user.user_id, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}
