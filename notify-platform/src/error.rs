//! Crate error type.
//!
//! Component boundaries with richer outcomes ([`SubmitError`], delivery
//! outcomes, JWT failures) convert into or out of this type; everything
//! else propagates it with `?`.
//!
//! [`SubmitError`]: crate::ingress::SubmitError

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sqlite: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("sqlite: {0}")]
    Database(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("amqp: {0}")]
    Broker(#[from] lapin::Error),

    #[error("json: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A notification status change that would leave a terminal state.
    #[error("notification cannot move from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("bad configuration: {0}")]
    Configuration(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_owned(),
            id: id.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    pub fn unavailable(what: impl Into<String>) -> Self {
        Self::ServiceUnavailable(what.into())
    }

    /// Whether the failure came from an unreachable or overloaded backing store
    /// rather than from the request itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseSqlx(_)
                | Self::Database(_)
                | Self::Redis(_)
                | Self::Broker(_)
                | Self::Timeout(_)
                | Self::ServiceUnavailable(_)
                | Self::Io(_)
        )
    }
}

/// Run `fut` bounded by `limit`, mapping an elapsed deadline to [`Error::Timeout`].
pub async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(Error::timeout(format!("{operation} exceeded {limit:?}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(Error::timeout("redis").is_unavailable());
        assert!(Error::Database("locked".into()).is_unavailable());
        assert!(!Error::validation("bad").is_unavailable());
        assert!(!Error::not_found("Notification", "x").is_unavailable());
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result: Result<()> = with_timeout("slow op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout(msg)) if msg.contains("slow op")));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout("fast op", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
