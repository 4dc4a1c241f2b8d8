//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::AuditLogDbModel;
use crate::database::time::ms_to_datetime;
use crate::domain::{Channel, Notification, NotificationStatus};
use crate::ingress::SubmitReceipt;

/// Default number of rows returned by list endpoints.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound for a caller-supplied limit.
pub const MAX_LIST_LIMIT: i64 = 500;

/// `202 Accepted` body for `POST /notify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub status: String,
    pub channel: Channel,
    pub id: String,
}

impl From<SubmitReceipt> for NotifyResponse {
    fn from(receipt: SubmitReceipt) -> Self {
        Self {
            status: NotificationStatus::Queued.as_str().to_string(),
            channel: receipt.channel,
            id: receipt.id,
        }
    }
}

/// Query parameters for `GET /history`.
///
/// Both are kept as raw strings: a malformed limit falls back to the default
/// rather than rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
    pub channel: Option<String>,
}

/// Query parameters for `GET /audit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<String>,
}

/// Parse a list limit: positive integers are capped, anything else is the default.
pub fn effective_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|l| l.trim().parse::<i64>().ok())
        .filter(|l| *l > 0)
        .map_or(DEFAULT_LIST_LIMIT, |l| l.min(MAX_LIST_LIMIT))
}

/// One ledger row as returned by `GET /history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: String,
    pub channel: Channel,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub status: NotificationStatus,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            channel: n.channel,
            recipient: n.recipient,
            subject: n.subject,
            body: n.body,
            status: n.status,
            attempts: n.attempts,
            last_error: n.last_error,
            created_at: n.created_at,
            sent_at: n.sent_at,
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryResponse {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogDbModel> for AuditEntryResponse {
    fn from(row: AuditLogDbModel) -> Self {
        Self {
            id: row.id,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            status: row.status,
            metadata: serde_json::from_str(&row.metadata)
                .unwrap_or(serde_json::Value::String(row.metadata)),
            created_at: ms_to_datetime(row.created_at),
        }
    }
}
