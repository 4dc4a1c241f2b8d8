//! Audit log row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::AuditEvent;

/// Audit log database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogDbModel {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    /// JSON object
    pub metadata: String,
    pub created_at: i64,
}

/// Insertable form of an audit event.
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub user_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub metadata: String,
    pub created_at: i64,
}

impl NewAuditLog {
    pub fn from_event(event: &AuditEvent, created_at: i64) -> crate::Result<Self> {
        Ok(Self {
            user_id: event.user_id,
            action: event.action.to_string(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            status: event.status.to_string(),
            metadata: serde_json::to_string(&event.metadata)?,
            created_at,
        })
    }
}
