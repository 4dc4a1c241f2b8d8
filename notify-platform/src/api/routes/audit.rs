use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthUser;
use crate::api::models::{AuditEntryResponse, AuditQuery, effective_limit};
use crate::api::server::AppState;
use crate::error::with_timeout;

pub fn router() -> Router<AppState> {
    Router::new().route("/audit", get(list_audit))
}

/// The caller's own audit trail, newest first.
async fn list_audit(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntryResponse>>> {
    let repo = state
        .audit_repository
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Audit log not configured"))?;

    let limit = effective_limit(query.limit.as_deref());
    let rows = with_timeout(
        "audit query",
        state.store_timeout,
        repo.find_by_user(user.user_id, limit),
    )
    .await?;

    Ok(Json(rows.into_iter().map(AuditEntryResponse::from).collect()))
}
