//! Global logging flood protection (spec §9 design note).
//!
//! Wraps `env_logger`'s formatter/filter behind a `log::Log` that counts
//! records emitted in the current one-second window and drops records past
//! a configured threshold, logging a single `warn!` the moment it starts
//! suppressing and a single `info!` once the window resets and suppression
//! lifts. This is a spec-level requirement, not tied to `env_logger`
//! specifically; `env_logger` is just the formatter the teacher already
//! depends on.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::{Log, Metadata, Record};

/// Records per second before suppression kicks in.
const DEFAULT_RECORDS_PER_SECOND: usize = 500;

struct FloodGuarded {
    inner: env_logger::Logger,
    limit: usize,
    window_start: AtomicU64,
    count: AtomicUsize,
    suppressing: std::sync::atomic::AtomicBool,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Log for FloodGuarded {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = now_secs();
        let start = self.window_start.load(Ordering::Relaxed);
        if now != start {
            // New window: reset the counter and, if we were suppressing,
            // announce that logging has resumed.
            self.window_start.store(now, Ordering::Relaxed);
            self.count.store(0, Ordering::Relaxed);
            if self.suppressing.swap(false, Ordering::Relaxed) {
                self.inner.log(
                    &Record::builder()
                        .level(log::Level::Info)
                        .target("zgm_srv::logging")
                        .args(format_args!("log flood window reset; suppression lifted"))
                        .build(),
                );
            }
        }
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= self.limit {
            self.inner.log(record);
        } else if !self.suppressing.swap(true, Ordering::Relaxed) {
            self.inner.log(
                &Record::builder()
                    .level(log::Level::Warn)
                    .target("zgm_srv::logging")
                    .args(format_args!(
                        "more than {} log records this second; suppressing further records until the next window",
                        self.limit
                    ))
                    .build(),
            );
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the flood-guarded logger as the global `log` facade backend.
/// Call once at process startup, before anything else logs.
pub fn init() {
    let env_logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level_filter = env_logger.filter();
    let guarded = FloodGuarded {
        inner: env_logger,
        limit: DEFAULT_RECORDS_PER_SECOND,
        window_start: AtomicU64::new(now_secs()),
        count: AtomicUsize::new(0),
        suppressing: std::sync::atomic::AtomicBool::new(false),
    };
    log::set_max_level(level_filter);
    if log::set_boxed_logger(Box::new(guarded)).is_err() {
        log::warn!("logger already initialised; flood protection not installed");
    }
}
