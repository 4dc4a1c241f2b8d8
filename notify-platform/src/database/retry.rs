//! Retry of writes that lose the SQLite write lock.

use rand::random;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Capped exponential backoff with up to 25% jitter.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    base: Duration,
    cap: Duration,
    max_retries: u32,
}

const WRITE_BACKOFF: Backoff = Backoff {
    base: Duration::from_millis(10),
    cap: Duration::from_millis(500),
    max_retries: 6,
};

impl Backoff {
    fn delay(&self, retry: u32) -> Duration {
        let exp = self.base.saturating_mul(1 << retry.min(16)).min(self.cap);
        let jitter_ms = random::<u64>() % (exp.as_millis() as u64 / 4 + 1);
        (exp + Duration::from_millis(jitter_ms)).min(self.cap)
    }
}

/// `SQLITE_BUSY` (5) / `SQLITE_LOCKED` (6), or a driver error that says so.
fn is_lock_contention(err: &Error) -> bool {
    let Error::DatabaseSqlx(err) = err else {
        return false;
    };
    if let sqlx::Error::Database(db) = err
        && matches!(db.code().as_deref(), Some("5" | "6"))
    {
        return true;
    }
    let text = err.to_string().to_ascii_lowercase();
    text.contains("database is locked") || text.contains("database is busy")
}

/// Run `op` until it succeeds, fails with anything other than lock
/// contention, or runs out of retries.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Err(err) if is_lock_contention(&err) && retry < WRITE_BACKOFF.max_retries => {
                let delay = WRITE_BACKOFF.delay(retry);
                retry += 1;
                debug!(op = op_name, retry, ?delay, "SQLite busy, backing off");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
