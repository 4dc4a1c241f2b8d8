//! Process-wide `tracing` subscriber.
//!
//! Console (text or JSON) plus a daily file `{prefix}.YYYY-MM-DD` under the
//! log directory, both filtered by one reloadable `EnvFilter`. Files older
//! than [`LOG_RETENTION_DAYS`] are removed by a background task.

use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, format::Writer, time::FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, reload};

use crate::{Error, Result};

/// Used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "notify_platform=info,sqlx=warn,lapin=warn";

pub const LOG_RETENTION_DAYS: u64 = 7;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines; anything else is text.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Live handle on the installed subscriber.
pub struct LoggingConfig {
    filter: reload::Handle<EnvFilter, Registry>,
    log_dir: PathBuf,
    file_prefix: String,
}

impl LoggingConfig {
    pub fn filter(&self) -> String {
        self.filter
            .with_current(ToString::to_string)
            .unwrap_or_default()
    }

    /// Swap the active filter, e.g. `notify_platform=debug,lapin=info`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::config(format!("invalid log filter {:?}: {}", directive, e)))?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::Other(format!("log filter reload failed: {}", e)))?;
        info!(%directive, "Log filter changed");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Sweep expired log files once a day until `cancel_token` fires.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let cutoff = Local::now().date_naive() - chrono::Days::new(LOG_RETENTION_DAYS);
                match remove_expired_logs(&this.log_dir, &this.file_prefix, cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Removed expired log files"),
                    Err(e) => warn!(error = %e, dir = %this.log_dir.display(), "Log retention sweep failed"),
                }
            }
            debug!("Log retention task stopped");
        });
    }
}

/// Date of a rotated file named `{prefix}.YYYY-MM-DD`.
fn rotation_date(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Remove this prefix's rotated files dated before `cutoff`.
async fn remove_expired_logs(dir: &Path, prefix: &str, cutoff: NaiveDate) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(|n| rotation_date(n, prefix)) else {
            continue;
        };
        if date >= cutoff || !entry.file_type().await?.is_file() {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove log file"),
        }
    }
    Ok(removed)
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_logging(
    log_dir: &str,
    file_prefix: &str,
    format: LogFormat,
) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, file_prefix));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let (console, file) = match format {
        LogFormat::Text => (
            fmt::layer().with_timer(LocalTimer).boxed(),
            fmt::layer()
                .with_timer(LocalTimer)
                .with_ansi(false)
                .with_writer(file_writer)
                .boxed(),
        ),
        LogFormat::Json => (
            fmt::layer().json().with_current_span(true).with_timer(LocalTimer).boxed(),
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_timer(LocalTimer)
                .with_writer(file_writer)
                .boxed(),
        ),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Other(format!("logging already initialised: {}", e)))?;

    Ok((
        Arc::new(LoggingConfig {
            filter: filter_handle,
            log_dir,
            file_prefix: file_prefix.to_string(),
        }),
        guard,
    ))
}
