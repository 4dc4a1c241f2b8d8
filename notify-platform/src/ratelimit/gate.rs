//! Admission gate: policy resolution followed by an atomic counter check.

use std::sync::Arc;
use tracing::{debug, info};

use super::counter::{Admission, QuotaCounter};
use super::resolver::RateLimitResolver;
use crate::domain::{Channel, RateLimitPolicy, counter_key};
use crate::{Error, Result};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow {
        policy: RateLimitPolicy,
        count: u64,
    },
    Deny {
        reason: String,
        retry_after_secs: u64,
    },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Accepts or rejects a request before anything is persisted or published.
///
/// The gate itself has no side effects beyond the counter increment for an
/// admitted call. Backing store failures come back as
/// [`Error::ServiceUnavailable`].
pub struct AdmissionGate {
    resolver: RateLimitResolver,
    counter: Arc<dyn QuotaCounter>,
}

impl AdmissionGate {
    pub fn new(resolver: RateLimitResolver, counter: Arc<dyn QuotaCounter>) -> Self {
        Self { resolver, counter }
    }

    pub async fn admit(&self, user_id: i64, channel: Channel) -> Result<AdmissionDecision> {
        let policy = self.resolver.resolve(user_id, channel).await?;
        let key = counter_key(user_id, channel);

        let admission = self
            .counter
            .try_admit(&key, policy.max_requests, policy.interval_seconds)
            .await
            .map_err(|e| match e {
                Error::ServiceUnavailable(_) => e,
                other => Error::unavailable(format!("quota counter: {}", other)),
            })?;

        match admission {
            Admission::Admitted { count } => {
                debug!(user_id, %channel, count, max = policy.max_requests, "Admitted");
                Ok(AdmissionDecision::Allow { policy, count })
            }
            Admission::Rejected { retry_after_secs } => {
                info!(
                    user_id,
                    %channel,
                    retry_after_secs,
                    max = policy.max_requests,
                    interval = policy.interval_seconds,
                    "Rate limit exceeded"
                );
                Ok(AdmissionDecision::Deny {
                    reason: format!(
                        "rate limit of {} requests per {}s exceeded for {}",
                        policy.max_requests, policy.interval_seconds, channel
                    ),
                    retry_after_secs,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{RateLimitRepository, SqlxRateLimitRepository};
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::counter::InMemoryQuotaCounter;
    use async_trait::async_trait;
    use std::time::Duration;

    async fn gate_with_policy(max: u32, interval: u64) -> (AdmissionGate, ManualClock) {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxRateLimitRepository::new(pool));
        repo.upsert(Some(1), Channel::Email, max, interval)
            .await
            .unwrap();

        let clock = ManualClock::new();
        let counter = Arc::new(InMemoryQuotaCounter::with_clock(Arc::new(clock.clone())));
        let resolver = RateLimitResolver::new(repo, Duration::from_secs(2));
        (AdmissionGate::new(resolver, counter), clock)
    }

    #[tokio::test]
    async fn test_deny_after_limit_with_retry_after() {
        let (gate, clock) = gate_with_policy(2, 60).await;

        assert!(gate.admit(1, Channel::Email).await.unwrap().is_allowed());
        clock.advance(Duration::from_secs(20));
        assert!(gate.admit(1, Channel::Email).await.unwrap().is_allowed());

        match gate.admit(1, Channel::Email).await.unwrap() {
            AdmissionDecision::Deny {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 40),
            other => panic!("expected deny, got {:?}", other),
        }

        // New window after expiry.
        clock.advance(Duration::from_secs(40));
        assert!(gate.admit(1, Channel::Email).await.unwrap().is_allowed());
    }

    struct BrokenCounter;

    #[async_trait]
    impl QuotaCounter for BrokenCounter {
        async fn try_admit(&self, _: &str, _: u32, _: u64) -> Result<Admission> {
            Err(Error::timeout("quota check"))
        }
    }

    #[tokio::test]
    async fn test_counter_failure_is_unavailable() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let resolver = RateLimitResolver::new(
            Arc::new(SqlxRateLimitRepository::new(pool)),
            Duration::from_secs(2),
        );
        let gate = AdmissionGate::new(resolver, Arc::new(BrokenCounter));

        let err = gate.admit(1, Channel::Telegram).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }
}
