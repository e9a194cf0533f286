use crate::config::ExporterConfig;
use crate::metrics::MetricFamilies;
use crate::supervisor::SupervisorState;
use std::sync::Arc;
use tokio::sync::watch;

/// Connection state of one supervised log source.
#[derive(Clone)]
pub struct SourceStatus {
    pub name: String,
    pub state: watch::Receiver<SupervisorState>,
}

impl SourceStatus {
    pub fn current(&self) -> SupervisorState {
        *self.state.borrow()
    }
}

/// Shared application state (thread-safe)
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ExporterConfig>,
    pub metrics: Arc<MetricFamilies>,
    pub sources: Arc<Vec<SourceStatus>>,
}

impl AppState {
    pub fn new(config: ExporterConfig, metrics: Arc<MetricFamilies>, sources: Vec<SourceStatus>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            sources: Arc::new(sources),
        }
    }

    /// True when every supervised source is currently streaming.
    pub fn all_streaming(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.current() == SupervisorState::Streaming)
    }
}
