//! Rate limit policy repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::RateLimitDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::Channel;

/// Rate limit policy storage.
///
/// The dispatch path only reads. Writes exist for external administration.
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// The most specific row for (user, channel): the user's own row if any,
    /// otherwise the channel-wide default row. At most one row is returned.
    async fn find_applicable(
        &self,
        user_id: i64,
        channel: Channel,
    ) -> Result<Option<RateLimitDbModel>>;

    /// Insert or replace the policy for (user or wildcard, channel).
    async fn upsert(
        &self,
        user_id: Option<i64>,
        channel: Channel,
        max_requests: u32,
        interval_seconds: u64,
    ) -> Result<()>;

    async fn delete(&self, user_id: Option<i64>, channel: Channel) -> Result<bool>;

    /// Rows that apply to `user_id`: their own and the channel defaults.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<RateLimitDbModel>>;
}

/// SQLx implementation of RateLimitRepository.
pub struct SqlxRateLimitRepository {
    pool: SqlitePool,
}

impl SqlxRateLimitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitRepository for SqlxRateLimitRepository {
    async fn find_applicable(
        &self,
        user_id: i64,
        channel: Channel,
    ) -> Result<Option<RateLimitDbModel>> {
        let row = sqlx::query_as::<_, RateLimitDbModel>(
            r#"
            SELECT * FROM rate_limits
            WHERE channel = ? AND (user_id = ? OR user_id IS NULL)
            ORDER BY user_id IS NULL ASC
            LIMIT 1
            "#,
        )
        .bind(channel.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(
        &self,
        user_id: Option<i64>,
        channel: Channel,
        max_requests: u32,
        interval_seconds: u64,
    ) -> Result<()> {
        let interval = i64::try_from(interval_seconds)
            .map_err(|_| crate::Error::validation("interval_seconds out of range"))?;
        let sql = if user_id.is_some() {
            r#"
            INSERT INTO rate_limits (user_id, channel, max_requests, interval_seconds)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, channel) WHERE user_id IS NOT NULL
            DO UPDATE SET max_requests = excluded.max_requests,
                          interval_seconds = excluded.interval_seconds
            "#
        } else {
            r#"
            INSERT INTO rate_limits (user_id, channel, max_requests, interval_seconds)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (channel) WHERE user_id IS NULL
            DO UPDATE SET max_requests = excluded.max_requests,
                          interval_seconds = excluded.interval_seconds
            "#
        };

        retry_on_sqlite_busy("upsert_rate_limit", || async {
            sqlx::query(sql)
                .bind(user_id)
                .bind(channel.as_str())
                .bind(i64::from(max_requests))
                .bind(interval)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, user_id: Option<i64>, channel: Channel) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE channel = ? AND user_id IS ?")
            .bind(channel.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<RateLimitDbModel>> {
        let rows = sqlx::query_as::<_, RateLimitDbModel>(
            r#"
            SELECT * FROM rate_limits
            WHERE user_id = ? OR user_id IS NULL
            ORDER BY channel, user_id IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
