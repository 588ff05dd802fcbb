//! keventsd: watch, filter, classify and record cluster changes.

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kevents_persist::SqliteSink;
use kevents_pipeline::{merge, standard_predicates, FilterPipeline, GenerationFilter};
use kevents_rules::{ClassificationRuleSet, Classifier};
use kevents_store::{RecordBuffer, RecordCleaner, RecordSink};
use tracing::{error, info, warn};

mod config;

use config::{Config, LogFormat};

fn init_tracing(config: &Config) {
    let env = if config.debug {
        "debug".to_string()
    } else {
        std::env::var("KEVENTS_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match config.log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Text => fmt.init(),
    }
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid metrics address; expected host:port"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(&config);
    init_metrics(config.metrics_addr.as_deref());
    config.log_effective();
    let res = run(config).await;
    if let Err(e) = &res {
        error!(error = ?e, "keventsd exiting");
    }
    res
}

async fn run(config: Config) -> Result<()> {
    let rules = Arc::new(ClassificationRuleSet::kubernetes_default().context("compiling classification rules")?);
    let client = kevents_kubehub::client(config.kubeconfig.as_deref()).await.context("building kube client")?;
    let sink: Arc<dyn RecordSink> = Arc::new(SqliteSink::open(&config.db_path())?);

    let sources = kevents_kubehub::watch_all(&client, &config.watched_kinds());
    let predicates = standard_predicates(Arc::clone(&rules), config.permit_errors, Arc::new(GenerationFilter::new()));
    let filtered = FilterPipeline::new(predicates).output(merge(sources));
    let (records, mut classifier) = Classifier::new(rules).output(filtered);
    // Stopping the buffer walks the stop chain back to every watcher.
    let buffer = RecordBuffer::spawn(config.buffer(), Arc::clone(&sink), records);
    let cleaner = RecordCleaner::spawn(config.cleaner(), Arc::clone(&sink));
    let mut ping = tokio::spawn(kevents_kubehub::ping(client, config.ping_period()));
    info!("pipeline running");

    let outcome = tokio::select! {
        res = tokio::signal::ctrl_c() => res
            .context("waiting for interrupt")
            .map(|()| info!("interrupt received; shutting down")),
        res = &mut ping => match res {
            Ok(Ok(())) => Err(anyhow!("kube api ping loop ended")),
            Ok(Err(e)) => Err(e.context("ping kube failed")),
            Err(e) => Err(anyhow!("ping task failed: {e}")),
        },
        res = &mut classifier => match res {
            Ok(Ok(())) => Err(anyhow!("watch pipeline ended unexpectedly")),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("classifier stopped")),
            Err(e) => Err(anyhow!("classifier task failed: {e}")),
        },
    };

    ping.abort();
    buffer.stop();
    cleaner.stop();
    if let Err(e) = sink.close().await {
        warn!(error = %e, "closing record sink");
    }
    info!(pending = buffer.pending(), "stopped");
    outcome
}
