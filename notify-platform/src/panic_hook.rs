//! Panic reporting through `tracing`.

use chrono::Local;
use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::Path;

/// What is known about a panic at the time the hook runs.
#[derive(Debug, Clone)]
struct PanicRecord {
    thread: String,
    location: String,
    message: String,
    backtrace: String,
}

impl PanicRecord {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| info.to_string());

        Self {
            thread: std::thread::current()
                .name()
                .unwrap_or("<unnamed>")
                .to_string(),
            location: info.location().map_or_else(
                || "<unknown>".to_string(),
                |l| format!("{}:{}:{}", l.file(), l.line(), l.column()),
            ),
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC thread={} location={} message={}\nBacktrace:\n{}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.thread,
            self.location,
            self.message,
            self.backtrace
        )
    }
}

/// Route panics to the log before the default hook runs.
///
/// Under `panic = "abort"` the record is also appended to today's
/// `{file_prefix}.YYYY-MM-DD` file in `log_dir`; the non-blocking file writer
/// would otherwise lose it.
pub fn install(log_dir: impl AsRef<Path>, file_prefix: &str) {
    let daily_file = {
        let dir = log_dir.as_ref().to_path_buf();
        let prefix = file_prefix.to_string();
        move || dir.join(format!("{}.{}", prefix, Local::now().format("%Y-%m-%d")))
    };
    let previous = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        // Reporting must never panic inside the hook.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::capture(info);
            tracing::error!(
                target: "notify_platform::panic",
                thread = %record.thread,
                location = %record.location,
                backtrace = %record.backtrace,
                "panicked: {}",
                record.message
            );

            if cfg!(panic = "abort") {
                let _ = append_record(&daily_file(), &record);
            }
        }));

        previous(info);
    }));
}

fn append_record(path: &Path, record: &PanicRecord) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}
