//! Fixed-window quota counters.
//!
//! A counter admits at most `max_requests` calls per key within a window of
//! `interval_seconds` that starts at the first admitted call. The check and
//! the increment happen as one indivisible step: concurrent callers can never
//! both observe a count below the limit and both be admitted past it.
//!
//! Two implementations are provided:
//! - [`RedisQuotaCounter`]: shared by every ingress instance, evaluated by a
//!   Lua script so the check, `INCR` and `EXPIRE` run atomically on the server.
//! - [`InMemoryQuotaCounter`]: process-local, driven by an injectable [`Clock`].
//!
//! Both report `retry_after_secs` rounded up to whole seconds.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{Script, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use crate::error::with_timeout;
use crate::{Error, Result};

/// Result of a single admission attempt against a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call was counted. `count` is the number of calls admitted in the
    /// current window, this one included.
    Admitted { count: u64 },
    /// The window is full.
    Rejected { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Atomic fixed-window counter.
#[async_trait]
pub trait QuotaCounter: Send + Sync {
    async fn try_admit(
        &self,
        key: &str,
        max_requests: u32,
        interval_seconds: u64,
    ) -> Result<Admission>;
}

/// Longest window honoured. Longer configured intervals are clamped so the
/// expiry stays representable both for Redis and for `Instant`.
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Closed in-memory windows are swept at most this often.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn window_secs(interval_seconds: u64) -> u64 {
    interval_seconds.clamp(1, MAX_WINDOW_SECS)
}

/// Whole seconds until `remaining` has passed, rounded up and never zero,
/// so a caller honouring it never lands back in the same window.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

/// `Retry-After` from a `PTTL` reply. Negative replies (no key, no expiry)
/// fall back to the full window.
fn retry_after_from_pttl(pttl_ms: i64, window_secs: u64) -> u64 {
    match u64::try_from(pttl_ms) {
        Ok(ms) => retry_after_secs(Duration::from_millis(ms)),
        Err(_) => window_secs,
    }
}

/// Check-and-increment in one step.
///
/// KEYS[1] counter key, ARGV[1] max requests, ARGV[2] window in seconds.
/// Returns `{admitted, count, pttl_ms}`. The expiry is armed only when the
/// counter is created, so later increments never extend the window. A full
/// counter that somehow lost its expiry gets one re-armed.
const TRY_ADMIT_LUA: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])

local current = tonumber(redis.call("GET", key) or "0")
if current >= limit then
    local pttl = redis.call("PTTL", key)
    if pttl == -1 then
        redis.call("EXPIRE", key, interval)
    end
    return {0, current, pttl}
end

local count = redis.call("INCR", key)
if count == 1 then
    redis.call("EXPIRE", key, interval)
end
return {1, count, 0}
"#;

/// Redis-backed quota counter.
pub struct RedisQuotaCounter {
    connection_manager: ConnectionManager,
    script: Script,
    timeout: Duration,
}

impl RedisQuotaCounter {
    pub fn new(connection_manager: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection_manager,
            script: Script::new(TRY_ADMIT_LUA),
            timeout,
        }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection_manager = with_timeout("redis connect", timeout, async {
            Ok::<_, Error>(client.get_connection_manager().await?)
        })
        .await?;
        Ok(Self::new(connection_manager, timeout))
    }

    /// Round-trip a PING, used by readiness checks.
    pub async fn ping(&self) -> Result<()> {
        let mut connection_manager = self.connection_manager.clone();
        with_timeout("redis ping", self.timeout, async move {
            let _: String = redis::cmd("PING")
                .query_async(&mut connection_manager)
                .await?;
            Ok::<_, Error>(())
        })
        .await
    }
}

#[async_trait]
impl QuotaCounter for RedisQuotaCounter {
    async fn try_admit(
        &self,
        key: &str,
        max_requests: u32,
        interval_seconds: u64,
    ) -> Result<Admission> {
        let window = window_secs(interval_seconds);
        let mut connection_manager = self.connection_manager.clone();
        let invocation = async {
            let (admitted, count, pttl): (i64, i64, i64) = self
                .script
                .key(key)
                .arg(max_requests)
                .arg(window)
                .invoke_async(&mut connection_manager)
                .await?;
            Ok::<_, Error>((admitted, count, pttl))
        };

        let (admitted, count, pttl) = with_timeout("quota check", self.timeout, invocation)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "Quota counter unavailable");
                match e {
                    Error::Timeout(_) | Error::Redis(_) => Error::unavailable(e.to_string()),
                    other => other,
                }
            })?;

        if admitted == 1 {
            Ok(Admission::Admitted {
                count: count.max(0) as u64,
            })
        } else {
            let retry_after_secs = retry_after_from_pttl(pttl, window);
            debug!(key, count, retry_after_secs, "Quota exhausted");
            Ok(Admission::Rejected { retry_after_secs })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    /// `None` when the close lies beyond what `Instant` can represent.
    closes_at: Option<Instant>,
}

impl Window {
    fn open(now: Instant, length: Duration) -> Self {
        Self {
            count: 0,
            closes_at: now.checked_add(length),
        }
    }

    fn is_closed(&self, now: Instant) -> bool {
        self.closes_at.is_some_and(|at| at <= now)
    }
}

struct Windows {
    by_key: HashMap<String, Window>,
    next_sweep: Instant,
}

impl Windows {
    fn sweep(&mut self, now: Instant) {
        let before = self.by_key.len();
        self.by_key.retain(|_, w| !w.is_closed(now));
        self.next_sweep = now.checked_add(SWEEP_INTERVAL).unwrap_or(now);

        let removed = before - self.by_key.len();
        if removed > 0 {
            debug!(removed, remaining = self.by_key.len(), "Swept closed quota windows");
        }
    }
}

/// Process-local quota counter.
///
/// Closed windows are dropped lazily, at most once per sweep interval, so
/// the map only holds keys seen recently. The lock is never held across an
/// await point.
pub struct InMemoryQuotaCounter {
    windows: Mutex<Windows>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQuotaCounter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                next_sweep: now.checked_add(SWEEP_INTERVAL).unwrap_or(now),
            }),
            clock,
        }
    }

    fn admit_now(&self, key: &str, max_requests: u32, interval_seconds: u64) -> Admission {
        let now = self.clock.now();
        let length = Duration::from_secs(window_secs(interval_seconds));
        let mut windows = self.windows.lock();

        if now >= windows.next_sweep {
            windows.sweep(now);
        }

        let window = windows
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| Window::open(now, length));
        if window.is_closed(now) {
            *window = Window::open(now, length);
        }

        if window.count >= u64::from(max_requests) {
            let retry_after_secs = match window.closes_at {
                Some(at) => retry_after_secs(at.saturating_duration_since(now)),
                None => length.as_secs(),
            };
            return Admission::Rejected { retry_after_secs };
        }

        window.count += 1;
        Admission::Admitted {
            count: window.count,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().by_key.is_empty()
    }
}

impl Default for InMemoryQuotaCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaCounter for InMemoryQuotaCounter {
    async fn try_admit(
        &self,
        key: &str,
        max_requests: u32,
        interval_seconds: u64,
    ) -> Result<Admission> {
        Ok(self.admit_now(key, max_requests, interval_seconds))
    }
}
