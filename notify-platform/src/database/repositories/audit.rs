//! Audit log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{AuditLogDbModel, NewAuditLog};
use crate::database::retry::retry_on_sqlite_busy;

/// Append-only audit storage.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, entry: &NewAuditLog) -> Result<()>;

    /// Newest first.
    async fn find_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<AuditLogDbModel>>;
}

/// SQLx implementation of AuditRepository.
pub struct SqlxAuditRepository {
    pool: SqlitePool,
}

impl SqlxAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqlxAuditRepository {
    async fn insert(&self, entry: &NewAuditLog) -> Result<()> {
        retry_on_sqlite_busy("insert_audit_log", || async {
            sqlx::query(
                r#"
                INSERT INTO audit_log
                    (user_id, action, entity_type, entity_id, status, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.user_id)
            .bind(&entry.action)
            .bind(&entry.entity_type)
            .bind(&entry.entity_id)
            .bind(&entry.status)
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn find_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<AuditLogDbModel>> {
        let rows = sqlx::query_as::<_, AuditLogDbModel>(
            "SELECT * FROM audit_log WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
