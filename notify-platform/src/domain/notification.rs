//! Notification entity and its lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Channel;
use crate::{Error, Result};

/// Lifecycle status of a notification in the ledger.
///
/// `queued` is the only state a row is created in and never re-entered.
/// `failed` is provisional while the broker still holds a requeued copy of
/// the message: a later attempt may move it to `sent`. `sent` is final.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub const ALL: [NotificationStatus; 3] = [Self::Queued, Self::Sent, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Whether no worker is expected to touch the row again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub fn can_transition_to(&self, target: NotificationStatus) -> bool {
        use NotificationStatus::*;

        match (self, target) {
            (Queued, Sent | Failed) => true,
            // A requeued attempt may still succeed or fail again.
            (Failed, Sent | Failed) => true,
            _ => false,
        }
    }

    pub fn transition_to(&self, target: NotificationStatus) -> Result<NotificationStatus> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

/// A notification as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: i64,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: NotificationStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Create a fresh `queued` notification with a new unique id.
    pub fn new_queued(
        user_id: i64,
        channel: Channel,
        recipient: impl Into<String>,
        subject: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            channel,
            recipient: recipient.into(),
            subject,
            body: body.into(),
            status: NotificationStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
        }
    }
}

/// Per-user aggregate over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: i64,
    pub by_channel: std::collections::BTreeMap<String, i64>,
    pub by_status: std::collections::BTreeMap<String, i64>,
}
