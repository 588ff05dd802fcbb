use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use kevents_core::ResourceKind;
use kevents_store::{BufferConfig, CleanerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "keventsd", version, about = "Subscribes for kubernetes watches, filters them and records to storage")]
pub struct Config {
    /// Kubeconfig file (default: in-cluster or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// SQLite database file (default: ~/.kevents/events.db)
    #[arg(long = "db-path", env = "KEVENTS_DB_PATH")]
    pub db_path: Option<String>,

    /// Records older than this are removed
    #[arg(long = "retention-secs", env = "KEVENTS_RETENTION_SECS", default_value_t = 86_400)]
    pub retention_secs: u64,

    #[arg(long = "cleanup-secs", env = "KEVENTS_CLEANUP_SECS", default_value_t = 43_200)]
    pub cleanup_secs: u64,

    #[arg(long = "buffer-capacity", env = "KEVENTS_BUFFER_CAPACITY", default_value_t = 500)]
    pub buffer_capacity: usize,

    /// Minimum pending records for a flush tick to write
    #[arg(long = "buffer-min-insert", env = "KEVENTS_BUFFER_MIN_INSERT", default_value_t = 10)]
    pub buffer_min_insert: usize,

    #[arg(long = "buffer-flush-secs", env = "KEVENTS_BUFFER_FLUSH_SECS", default_value_t = 30)]
    pub buffer_flush_secs: u64,

    /// API server health check interval
    #[arg(long = "ping-secs", env = "KEVENTS_PING_SECS", default_value_t = 5)]
    pub ping_secs: u64,

    /// Comma-separated kinds to watch (default: all)
    #[arg(long, env = "KEVENTS_KINDS", value_delimiter = ',', value_parser = parse_kind)]
    pub kinds: Vec<ResourceKind>,

    /// Record watch Error notifications instead of dropping them
    #[arg(long = "permit-errors", env = "KEVENTS_PERMIT_ERRORS", action = ArgAction::SetTrue)]
    pub permit_errors: bool,

    /// Force debug logging
    #[arg(long, env = "KEVENTS_DEBUG", action = ArgAction::SetTrue)]
    pub debug: bool,

    #[arg(long = "log-format", env = "KEVENTS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Prometheus listener, host:port
    #[arg(long = "metrics-addr", env = "KEVENTS_METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormat { Json, Text }

fn parse_kind(s: &str) -> Result<ResourceKind, String> { s.parse() }

impl Config {
    pub fn watched_kinds(&self) -> Vec<ResourceKind> {
        if self.kinds.is_empty() {
            return ResourceKind::ALL.to_vec();
        }
        let mut kinds = Vec::with_capacity(self.kinds.len());
        for k in &self.kinds {
            if !kinds.contains(k) {
                kinds.push(*k);
            }
        }
        kinds
    }

    pub fn db_path(&self) -> String { self.db_path.clone().unwrap_or_else(kevents_persist::default_db_path) }

    pub fn buffer(&self) -> BufferConfig {
        BufferConfig {
            capacity: self.buffer_capacity,
            flush_period: Duration::from_secs(self.buffer_flush_secs.max(1)),
            min_batch_size: self.buffer_min_insert,
        }
    }

    pub fn cleaner(&self) -> CleanerConfig {
        CleanerConfig {
            run_period: Duration::from_secs(self.cleanup_secs.max(1)),
            retention_period: Duration::from_secs(self.retention_secs),
        }
    }

    pub fn ping_period(&self) -> Duration { Duration::from_secs(self.ping_secs.max(1)) }

    /// Dump of the effective flags, one field per flag.
    pub fn log_effective(&self) {
        tracing::info!(
            kubeconfig = self.kubeconfig.as_deref().unwrap_or("<inferred>"),
            db_path = %self.db_path(),
            retention_secs = self.retention_secs,
            cleanup_secs = self.cleanup_secs,
            buffer_capacity = self.buffer_capacity,
            buffer_min_insert = self.buffer_min_insert,
            buffer_flush_secs = self.buffer_flush_secs,
            ping_secs = self.ping_secs,
            kinds = %self.watched_kinds().iter().map(|k| k.as_str()).collect::<Vec<_>>().join(","),
            permit_errors = self.permit_errors,
            debug = self.debug,
            log_format = ?self.log_format,
            metrics_addr = self.metrics_addr.as_deref().unwrap_or("<disabled>"),
            "effective configuration"
        );
    }
}
