//! Boot — logging init, accumulators and supervisors.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::{ExporterConfig, LogFormat, LogOutput};
use crate::metrics::{MetricFamilies, MetricsError};
use crate::probe::{ProbeMonitor, BACKEND_HEALTH};
use crate::session::SessionClassifier;
use crate::source::{Grouping, LogSource, Subscription};
use crate::state::{AppState, SourceStatus};
use crate::supervisor::SourceSupervisor;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Failed to open log file '{path}': {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Phase 1: basic tracing so configuration loading can log.
/// Thread-local, so phase 2 can install the global subscriber afterwards.
pub fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: global subscriber from the `logging` section. `RUST_LOG` wins
/// over the configured level.
pub fn init_tracing_from_config(config: &ExporterConfig) -> Result<(), BootError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let result = match (&config.logging.format, &config.logging.output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        (LogFormat::Json, LogOutput::File { path }) => {
            let file = open_log_file(path)?;
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        (LogFormat::Pretty, LogOutput::File { path }) => {
            let file = open_log_file(path)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };

    result.map_err(|e| BootError::Subscriber(e.to_string()))
}

fn open_log_file(path: &str) -> Result<std::fs::File, BootError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| BootError::LogFile {
            path: path.to_string(),
            source,
        })
}

/// Register metric families, start accumulators and spawn the supervisors.
///
/// Must be called from within a Tokio runtime. The spawned tasks run for the
/// life of the process.
pub fn boot(config: ExporterConfig, source: Arc<dyn LogSource>) -> Result<AppState, BootError> {
    let features = config.features();
    let metrics = Arc::new(MetricFamilies::new(features)?);
    let accumulators = metrics.start(config.source.queue_capacity);

    let retry_delay = Duration::from_secs(config.source.reconnect_delay_secs);
    let trace = config.logging.debug;
    let instance = config.source.instance.clone();
    let mut sources = Vec::new();

    let filters = Arc::new(config.filters());
    info!(
        request_headers = filters.request.len(),
        response_headers = filters.response.len(),
        status_codes = features.status_codes,
        http_version = features.http_version,
        probes = features.probes,
        "Tracking configured"
    );

    let sink = accumulators.sink;
    let requests = SourceSupervisor::new(
        "requests",
        Arc::clone(&source),
        instance.clone(),
        Grouping::Request,
        move || SessionClassifier::new(Arc::clone(&filters), features, sink.clone()).with_trace(trace),
    )
    .with_retry_delay(retry_delay);
    sources.push(SourceStatus {
        name: requests.name().to_string(),
        state: requests.subscribe(),
    });
    tokio::spawn(requests.run());

    if let Some(probes) = accumulators.probes {
        let monitor = SourceSupervisor::new(
            "probes",
            Arc::clone(&source),
            instance,
            Subscription::new(Grouping::Raw).include(BACKEND_HEALTH),
            move || ProbeMonitor::new(probes.clone()).with_trace(trace),
        )
        .with_retry_delay(retry_delay);
        sources.push(SourceStatus {
            name: monitor.name().to_string(),
            state: monitor.subscribe(),
        });
        tokio::spawn(monitor.run());
    }

    info!(
        supervisors = sources.len(),
        instance = %config.source.instance,
        "✓ Log pipeline started"
    );

    Ok(AppState::new(config, metrics, sources))
}
