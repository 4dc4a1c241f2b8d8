//! Notification ledger repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::instrument;

use crate::database::models::NotificationDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::{Channel, Notification, NotificationStats, NotificationStatus};
use crate::{Error, Result};

/// Durable record of every notification and its lifecycle status.
///
/// Rows are inserted by the ingress and updated by channel workers, always
/// single-row and keyed by id. Status updates never move a `sent` row.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a new row. The notification must be `queued`.
    async fn create(&self, notification: &Notification) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<Notification>>;

    async fn get(&self, id: &str) -> Result<Notification> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    /// Move the row to `sent`. The sent timestamp is only set on the first
    /// successful transition. Returns `false` if the row is missing or was
    /// already `sent`.
    async fn mark_sent(&self, id: &str) -> Result<bool>;

    /// Move the row to `failed` and record `reason`. Returns `false` if the row
    /// is missing or already `sent`.
    async fn mark_failed(&self, id: &str, reason: &str) -> Result<bool>;

    /// Newest first, optionally restricted to one channel.
    async fn find_by_user(
        &self,
        user_id: i64,
        limit: i64,
        channel: Option<Channel>,
    ) -> Result<Vec<Notification>>;

    async fn get_stats(&self, user_id: i64) -> Result<NotificationStats>;

    /// Rows still `queued` that were created before `created_before_ms`,
    /// oldest first. Candidates for the reconciliation sweep of orphans left
    /// behind by failed publishes.
    async fn find_stale_queued(
        &self,
        created_before_ms: i64,
        limit: i64,
    ) -> Result<Vec<Notification>>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_domain(rows: Vec<NotificationDbModel>) -> Result<Vec<Notification>> {
    rows.into_iter().map(Notification::try_from).collect()
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    #[instrument(skip(self, notification), fields(id = %notification.id, channel = %notification.channel))]
    async fn create(&self, notification: &Notification) -> Result<()> {
        if notification.status != NotificationStatus::Queued {
            return Err(Error::InvalidStateTransition {
                from: notification.status.as_str().to_string(),
                to: NotificationStatus::Queued.as_str().to_string(),
            });
        }

        let row = NotificationDbModel::from(notification);
        retry_on_sqlite_busy("create_notification", || async {
            sqlx::query(
                r#"
                INSERT INTO notifications
                    (id, user_id, channel, recipient, subject, body, status, attempts, last_error, created_at, sent_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(row.user_id)
            .bind(&row.channel)
            .bind(&row.recipient)
            .bind(&row.subject)
            .bind(&row.body)
            .bind(&row.status)
            .bind(row.attempts)
            .bind(&row.last_error)
            .bind(row.created_at)
            .bind(row.sent_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Notification>> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn mark_sent(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("mark_notification_sent", || async {
            let result = sqlx::query(
                r#"
                UPDATE notifications SET
                    status = 'sent',
                    sent_at = COALESCE(sent_at, ?),
                    attempts = attempts + 1,
                    last_error = NULL
                WHERE id = ? AND status != 'sent'
                "#,
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, id: &str, reason: &str) -> Result<bool> {
        retry_on_sqlite_busy("mark_notification_failed", || async {
            let result = sqlx::query(
                r#"
                UPDATE notifications SET
                    status = 'failed',
                    attempts = attempts + 1,
                    last_error = ?
                WHERE id = ? AND status != 'sent'
                "#,
            )
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_by_user(
        &self,
        user_id: i64,
        limit: i64,
        channel: Option<Channel>,
    ) -> Result<Vec<Notification>> {
        let rows = match channel {
            Some(channel) => {
                sqlx::query_as::<_, NotificationDbModel>(
                    r#"
                    SELECT * FROM notifications
                    WHERE user_id = ? AND channel = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(user_id)
                .bind(channel.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, NotificationDbModel>(
                    r#"
                    SELECT * FROM notifications
                    WHERE user_id = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        into_domain(rows)
    }

    async fn get_stats(&self, user_id: i64) -> Result<NotificationStats> {
        let by_channel: Vec<(String, i64)> = sqlx::query_as(
            "SELECT channel, COUNT(*) FROM notifications WHERE user_id = ? GROUP BY channel",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM notifications WHERE user_id = ? GROUP BY status",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = NotificationStats {
            total: by_channel.iter().map(|(_, count)| count).sum(),
            by_channel: BTreeMap::new(),
            by_status: BTreeMap::new(),
        };

        // Report every known bucket, even when empty.
        for channel in Channel::ALL {
            stats.by_channel.insert(channel.as_str().to_string(), 0);
        }
        for status in NotificationStatus::ALL {
            stats.by_status.insert(status.as_str().to_string(), 0);
        }
        stats.by_channel.extend(by_channel);
        stats.by_status.extend(by_status);

        Ok(stats)
    }

    async fn find_stale_queued(
        &self,
        created_before_ms: i64,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(
            r#"
            SELECT * FROM notifications
            WHERE status = 'queued' AND created_at < ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(created_before_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_domain(rows)
    }
}
