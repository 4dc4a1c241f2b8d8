//! Notification ledger row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Channel, Notification, NotificationStatus};
use crate::{Error, Result};

/// Notification database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub user_id: i64,
    /// email, telegram, whatsapp
    pub channel: String,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    /// queued, sent, failed
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Unix epoch milliseconds
    pub created_at: i64,
    pub sent_at: Option<i64>,
}

impl From<&Notification> for NotificationDbModel {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            user_id: n.user_id,
            channel: n.channel.as_str().to_string(),
            recipient: n.recipient.clone(),
            subject: n.subject.clone(),
            body: n.body.clone(),
            status: n.status.as_str().to_string(),
            attempts: n.attempts,
            last_error: n.last_error.clone(),
            created_at: datetime_to_ms(n.created_at),
            sent_at: n.sent_at.map(datetime_to_ms),
        }
    }
}

impl TryFrom<NotificationDbModel> for Notification {
    type Error = Error;

    fn try_from(row: NotificationDbModel) -> Result<Self> {
        let channel = Channel::parse(&row.channel).ok_or_else(|| {
            Error::Database(format!("unknown channel '{}' on row {}", row.channel, row.id))
        })?;
        let status = NotificationStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(format!("unknown status '{}' on row {}", row.status, row.id))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            channel,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: ms_to_datetime(row.created_at),
            sent_at: row.sent_at.map(ms_to_datetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_model_conversion() {
        let n = Notification::new_queued(5, Channel::WhatsApp, "79001234567", None, "hello");
        let row = NotificationDbModel::from(&n);
        assert_eq!(row.channel, "whatsapp");
        assert_eq!(row.status, "queued");

        let back = Notification::try_from(row).unwrap();
        assert_eq!(back.id, n.id);
        assert_eq!(back.channel, Channel::WhatsApp);
        assert_eq!(back.created_at.timestamp_millis(), n.created_at.timestamp_millis());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let n = Notification::new_queued(5, Channel::Email, "a@example.com", None, "x");
        let mut row = NotificationDbModel::from(&n);
        row.status = "retrying".to_string();
        assert!(Notification::try_from(row).is_err());
    }
}
