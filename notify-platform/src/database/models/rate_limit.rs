//! Rate limit policy row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{PolicyScope, RateLimitPolicy};

/// Rate limit database model. A `None` user id is the channel-wide default.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RateLimitDbModel {
    pub id: i64,
    pub user_id: Option<i64>,
    pub channel: String,
    pub max_requests: i64,
    pub interval_seconds: i64,
}

impl RateLimitDbModel {
    /// Convert to a policy, or `None` if the row holds non-positive values.
    pub fn to_policy(&self) -> Option<RateLimitPolicy> {
        let max_requests = u32::try_from(self.max_requests).ok().filter(|v| *v > 0)?;
        let interval_seconds = u64::try_from(self.interval_seconds).ok().filter(|v| *v > 0)?;
        let scope = if self.user_id.is_some() {
            PolicyScope::User
        } else {
            PolicyScope::ChannelDefault
        };
        Some(RateLimitPolicy::new(max_requests, interval_seconds, scope))
    }
}
