//! Rate limit policy resolution.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::database::repositories::RateLimitRepository;
use crate::domain::{Channel, RateLimitPolicy};
use crate::error::with_timeout;
use crate::{Error, Result};

/// Resolves the quota for a (user, channel) pair.
///
/// Most specific first: the user's own row, then the channel-wide default
/// row, then [`RateLimitPolicy::SYSTEM_DEFAULT`]. A missing row is not an
/// error. A store failure or timeout is reported as
/// [`Error::ServiceUnavailable`].
pub struct RateLimitResolver {
    repository: Arc<dyn RateLimitRepository>,
    timeout: Duration,
}

impl RateLimitResolver {
    pub fn new(repository: Arc<dyn RateLimitRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    pub async fn resolve(&self, user_id: i64, channel: Channel) -> Result<RateLimitPolicy> {
        let row = with_timeout(
            "rate limit lookup",
            self.timeout,
            self.repository.find_applicable(user_id, channel),
        )
        .await
        .map_err(|e| {
            warn!(user_id, %channel, error = %e, "Rate limit store unavailable");
            Error::unavailable(format!("rate limit store: {}", e))
        })?;

        let policy = match row.as_ref().and_then(|r| r.to_policy()) {
            Some(policy) => policy,
            None => {
                if let Some(row) = &row {
                    warn!(id = row.id, "Ignoring rate limit row with non-positive values");
                }
                RateLimitPolicy::SYSTEM_DEFAULT
            }
        };

        debug!(
            user_id,
            %channel,
            scope = %policy.scope,
            max_requests = policy.max_requests,
            interval_seconds = policy.interval_seconds,
            "Resolved rate limit policy"
        );

        Ok(policy)
    }
}
