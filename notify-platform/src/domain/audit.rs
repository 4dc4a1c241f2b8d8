//! Audit events.

use serde::{Deserialize, Serialize};

/// Action tag recorded in the audit trail.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    NotificationQueued,
    NotificationPublishFailed,
    NotificationSent,
    NotificationFailed,
    HistoryView,
}

/// Outcome recorded alongside an audit action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub user_id: i64,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub status: AuditOutcome,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Event about a notification entity.
    pub fn notification(
        user_id: i64,
        action: AuditAction,
        notification_id: impl Into<String>,
        status: AuditOutcome,
    ) -> Self {
        Self {
            user_id,
            action,
            entity_type: "notification".to_string(),
            entity_id: notification_id.into(),
            status,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(AuditAction::NotificationQueued.to_string(), "NOTIFICATION_QUEUED");
        assert_eq!(AuditAction::HistoryView.to_string(), "HISTORY_VIEW");
        assert_eq!(AuditOutcome::Failure.to_string(), "failure");
    }

    #[test]
    fn test_notification_event() {
        let event = AuditEvent::notification(
            7,
            AuditAction::NotificationSent,
            "abc",
            AuditOutcome::Success,
        )
        .with_metadata(serde_json::json!({"channel": "email"}));

        assert_eq!(event.entity_type, "notification");
        assert_eq!(event.entity_id, "abc");
        assert_eq!(event.metadata["channel"], "email");
    }
}
