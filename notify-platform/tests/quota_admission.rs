//! Admission gate behaviour under concurrency, plus the shared Redis counter.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use notify_platform::database::repositories::{RateLimitRepository, SqlxRateLimitRepository};
use notify_platform::database::{init_pool_with_size, run_migrations};
use notify_platform::domain::Channel;
use notify_platform::ratelimit::{
    Admission, AdmissionDecision, AdmissionGate, InMemoryQuotaCounter, ManualClock, QuotaCounter,
    RateLimitResolver, RedisQuotaCounter,
};

async fn gate(max_requests: u32, counter: Arc<dyn QuotaCounter>) -> AdmissionGate {
    let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let limits = Arc::new(SqlxRateLimitRepository::new(pool));
    limits
        .upsert(None, Channel::Email, max_requests, 60)
        .await
        .unwrap();
    AdmissionGate::new(RateLimitResolver::new(limits, Duration::from_secs(2)), counter)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_allow_exactly_the_limit() {
    let gate = Arc::new(gate(5, Arc::new(InMemoryQuotaCounter::new())).await);

    let mut tasks = JoinSet::new();
    for _ in 0..40 {
        let gate = gate.clone();
        tasks.spawn(async move { gate.admit(3, Channel::Email).await.unwrap() });
    }

    let mut allowed = Vec::new();
    let mut denied = 0;
    while let Some(decision) = tasks.join_next().await {
        match decision.unwrap() {
            AdmissionDecision::Allow { count, .. } => allowed.push(count),
            AdmissionDecision::Deny {
                retry_after_secs, ..
            } => {
                assert!((1..=60).contains(&retry_after_secs));
                denied += 1;
            }
        }
    }

    allowed.sort_unstable();
    assert_eq!(allowed, vec![1, 2, 3, 4, 5]);
    assert_eq!(denied, 35);
}

#[tokio::test]
async fn window_reopens_after_interval() {
    let clock = ManualClock::new();
    let gate = gate(1, Arc::new(InMemoryQuotaCounter::with_clock(Arc::new(clock.clone())))).await;

    assert!(gate.admit(3, Channel::Email).await.unwrap().is_allowed());
    assert!(!gate.admit(3, Channel::Email).await.unwrap().is_allowed());

    clock.advance(Duration::from_secs(60));
    assert!(gate.admit(3, Channel::Email).await.unwrap().is_allowed());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn admitted_never_exceeds_limit(limit in 1u32..20, calls in 0usize..60, advance in 0u64..120) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let clock = ManualClock::new();
            let counter = InMemoryQuotaCounter::with_clock(Arc::new(clock.clone()));

            let mut admitted = 0usize;
            for _ in 0..calls {
                if counter.try_admit("k", limit, 60).await.unwrap().is_admitted() {
                    admitted += 1;
                }
            }
            prop_assert_eq!(admitted, calls.min(limit as usize));

            clock.advance(Duration::from_secs(advance));
            let next = counter.try_admit("k", limit, 60).await.unwrap();
            if advance >= 60 || calls < limit as usize {
                prop_assert!(next.is_admitted());
            } else {
                prop_assert_eq!(next, Admission::Rejected { retry_after_secs: 60 - advance });
            }
            Ok(())
        })?;
    }
}

/// Needs a live server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
#[tokio::test]
#[ignore]
async fn redis_counter_is_atomic_across_connections() {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
    let key = format!("rl:test:{}", uuid::Uuid::new_v4());

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let counter = Arc::new(
            RedisQuotaCounter::connect(&url, Duration::from_secs(2))
                .await
                .unwrap(),
        );
        for _ in 0..10 {
            let counter = counter.clone();
            let key = key.clone();
            tasks.spawn(async move { counter.try_admit(&key, 7, 30).await.unwrap() });
        }
    }

    let mut admitted = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Admission::Admitted { .. } => admitted += 1,
            Admission::Rejected { retry_after_secs } => {
                assert!((1..=30).contains(&retry_after_secs))
            }
        }
    }
    assert_eq!(admitted, 7);
}
