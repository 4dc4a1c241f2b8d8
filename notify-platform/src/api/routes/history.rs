//! Per-user history and statistics.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde_json::json;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthUser;
use crate::api::models::{HistoryQuery, NotificationResponse, effective_limit};
use crate::api::server::AppState;
use crate::domain::{AuditAction, AuditEvent, AuditOutcome, Channel, NotificationStats};
use crate::error::with_timeout;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/history", get(history))
        .route("/stats", get(stats))
}

/// `all` and an empty value mean every channel.
fn channel_filter(raw: Option<&str>) -> Result<Option<Channel>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(c) if c.eq_ignore_ascii_case("all") => Ok(None),
        Some(c) => Channel::parse(&c.to_ascii_lowercase())
            .map(Some)
            .ok_or_else(|| {
                ApiError::validation(format!("Unknown channel '{}'", c)).with_details(json!([{
                    "field": "channel",
                    "message": "must be one of: all, email, telegram, whatsapp",
                }]))
            }),
    }
}

async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<NotificationResponse>>> {
    let repo = state
        .notification_repository
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Ledger not configured"))?;

    let limit = effective_limit(query.limit.as_deref());
    let channel = channel_filter(query.channel.as_deref())?;

    let rows = with_timeout(
        "history query",
        state.store_timeout,
        repo.find_by_user(user.user_id, limit, channel),
    )
    .await?;
    debug!(user_id = user.user_id, rows = rows.len(), "History listed");

    if let Some(sink) = &state.audit_sink {
        sink.record(
            AuditEvent::notification(user.user_id, AuditAction::HistoryView, "", AuditOutcome::Success)
                .with_metadata(json!({
                    "limit": limit,
                    "channel": channel.map_or("all", |c| c.as_str()),
                })),
        )
        .await;
    }

    Ok(Json(rows.into_iter().map(NotificationResponse::from).collect()))
}

async fn stats(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<NotificationStats>> {
    let repo = state
        .notification_repository
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Ledger not configured"))?;

    let stats = with_timeout("stats query", state.store_timeout, repo.get_stats(user.user_id)).await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_filter() {
        assert_eq!(channel_filter(None).unwrap(), None);
        assert_eq!(channel_filter(Some("")).unwrap(), None);
        assert_eq!(channel_filter(Some("ALL")).unwrap(), None);
        assert_eq!(channel_filter(Some("Email")).unwrap(), Some(Channel::Email));
        assert!(channel_filter(Some("sms")).is_err());
    }
}
