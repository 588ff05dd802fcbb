//! Periodic retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kevents_core::StopHandle;
use metrics::counter;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::{RecordSink, SinkError, MIN_PERIOD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanerConfig {
    pub run_period: Duration,
    pub retention_period: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self { run_period: Duration::from_secs(12 * 3600), retention_period: Duration::from_secs(24 * 3600) }
    }
}

#[derive(Clone)]
pub struct RecordCleaner {
    sink: Arc<dyn RecordSink>,
    config: CleanerConfig,
    stop: StopHandle,
}

impl RecordCleaner {
    pub fn new(config: CleanerConfig, sink: Arc<dyn RecordSink>) -> Self {
        Self { sink, config, stop: StopHandle::new("record_cleaner") }
    }

    /// Start the timer loop; the first run happens one period after start.
    pub fn spawn(config: CleanerConfig, sink: Arc<dyn RecordSink>) -> Self {
        let cleaner = Self::new(config, sink);
        let worker = cleaner.clone();
        let token = cleaner.stop.token();
        info!(
            component = "record_cleaner",
            run_secs = config.run_period.as_secs(),
            retention_secs = config.retention_period.as_secs(),
            "starting"
        );
        tokio::spawn(async move {
            let period = config.run_period.max(MIN_PERIOD);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Failures are logged inside; the next tick retries.
                let _ = worker.run_once().await;
            }
            info!(component = "record_cleaner", "stopped");
        });
        cleaner
    }

    /// Oldest surviving record time for a run at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.retention_period)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn run_once(&self) -> Result<u64, SinkError> { self.run_at(Utc::now()).await }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<u64, SinkError> {
        let cutoff = self.cutoff(now);
        counter!("cleaner_runs_total", 1);
        match self.sink.cleanup(cutoff).await {
            Ok(removed) => {
                info!(component = "record_cleaner", removed, cutoff = %cutoff, "cleanup done");
                Ok(removed)
            }
            Err(e) => {
                error!(component = "record_cleaner", error = %e, cutoff = %cutoff, "cleanup failed");
                counter!("cleaner_errors_total", 1);
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &CleanerConfig { &self.config }

    pub fn stop(&self) -> bool { self.stop.stop() }
}
