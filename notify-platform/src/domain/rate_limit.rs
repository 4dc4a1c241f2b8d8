//! Rate limit policy value objects.

use serde::{Deserialize, Serialize};

use super::Channel;

/// Where a resolved policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// Row configured for this exact user and channel.
    User,
    /// Wildcard row for every user of the channel.
    ChannelDefault,
    /// Hard-coded fallback.
    System,
}

/// Quota applied to a (user, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub interval_seconds: u64,
    pub scope: PolicyScope,
}

impl RateLimitPolicy {
    /// Applied when no row matches: 10 requests per 60 seconds.
    pub const SYSTEM_DEFAULT: RateLimitPolicy = RateLimitPolicy {
        max_requests: 10,
        interval_seconds: 60,
        scope: PolicyScope::System,
    };

    pub fn new(max_requests: u32, interval_seconds: u64, scope: PolicyScope) -> Self {
        Self {
            max_requests,
            interval_seconds,
            scope,
        }
    }
}

/// Key of the ephemeral quota counter for a (user, channel) pair.
pub fn counter_key(user_id: i64, channel: Channel) -> String {
    format!("rl:{}:{}", user_id, channel.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_default() {
        let policy = RateLimitPolicy::SYSTEM_DEFAULT;
        assert_eq!(policy.max_requests, 10);
        assert_eq!(policy.interval_seconds, 60);
        assert_eq!(policy.scope, PolicyScope::System);
    }

    #[test]
    fn test_counter_key_format() {
        assert_eq!(counter_key(42, Channel::Telegram), "rl:42:telegram");
    }
}
