use std::sync::Arc;

use crate::clock::Clock;
use crate::ledger::FjallLedger;
use crate::observability::Metrics;
use crate::queue::{ExportScheduler, JobBroker};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<FjallLedger>,
    pub broker: Arc<JobBroker>,
    pub scheduler: Arc<ExportScheduler>,
    pub metrics: Arc<Metrics>,
    pub clock: Arc<dyn Clock>,
    /// Largest accepted request body, after decompression
    pub max_payload_bytes: usize,
}

impl AppState {
    pub fn new(
        ledger: Arc<FjallLedger>,
        broker: Arc<JobBroker>,
        scheduler: Arc<ExportScheduler>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            ledger,
            broker,
            scheduler,
            metrics,
            clock,
            max_payload_bytes,
        }
    }
}
