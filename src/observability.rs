//! Logging setup and in-process export counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::handlers::ItemStatus;

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    // Already installed (tests, embedding)
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already set");
    }
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    exports_completed: AtomicU64,
    exports_failed: AtomicU64,
    exports_timed_out: AtomicU64,
    batches_completed: AtomicU64,
    batch_items_completed: AtomicU64,
    batch_items_failed: AtomicU64,
    batch_items_not_found: AtomicU64,
    messages_retried: AtomicU64,
    messages_dead_lettered: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = name, "Metric incremented");
    }

    pub fn export_completed(&self) {
        Self::incr(&self.exports_completed, "exports_completed");
    }

    pub fn export_failed(&self) {
        Self::incr(&self.exports_failed, "exports_failed");
    }

    pub fn export_timed_out(&self) {
        Self::incr(&self.exports_timed_out, "exports_timed_out");
    }

    pub fn batch_completed(&self) {
        Self::incr(&self.batches_completed, "batches_completed");
    }

    pub fn batch_item(&self, status: ItemStatus) {
        match status {
            ItemStatus::Completed => {
                Self::incr(&self.batch_items_completed, "batch_items_completed")
            }
            ItemStatus::Failed | ItemStatus::Error => {
                Self::incr(&self.batch_items_failed, "batch_items_failed")
            }
            ItemStatus::NotFound => {
                Self::incr(&self.batch_items_not_found, "batch_items_not_found")
            }
        }
    }

    pub fn message_retried(&self) {
        Self::incr(&self.messages_retried, "messages_retried");
    }

    pub fn message_dead_lettered(&self) {
        Self::incr(&self.messages_dead_lettered, "messages_dead_lettered");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exports_completed: self.exports_completed.load(Ordering::Relaxed),
            exports_failed: self.exports_failed.load(Ordering::Relaxed),
            exports_timed_out: self.exports_timed_out.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batch_items_completed: self.batch_items_completed.load(Ordering::Relaxed),
            batch_items_failed: self.batch_items_failed.load(Ordering::Relaxed),
            batch_items_not_found: self.batch_items_not_found.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub exports_completed: u64,
    pub exports_failed: u64,
    pub exports_timed_out: u64,
    pub batches_completed: u64,
    pub batch_items_completed: u64,
    pub batch_items_failed: u64,
    pub batch_items_not_found: u64,
    pub messages_retried: u64,
    pub messages_dead_lettered: u64,
}
