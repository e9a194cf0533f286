//! Prometheus families fed by per-family accumulators.
//!
//! The label schema of every family is fixed at startup from the
//! [`FeatureSet`]; families whose tracking is disabled are not registered
//! at all, so they never appear in the exposition.

pub mod accumulator;
pub mod recorders;
pub mod sink;

pub use accumulator::{Accumulator, AccumulatorClosed, Recorder};
pub use recorders::CounterPair;
pub use sink::FactSink;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::FeatureSet;
use crate::session::ProbeSample;
use recorders::{HeaderRecorder, ProbeRecorder, StatusRecorder, TagRecorder, VersionRecorder};

/// Prefix for every exported family.
pub const NAMESPACE: &str = "varnish";

/// Probe response times are sub-second in practice.
const PROBE_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Exposition is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// All exporter metric families, registered in the exporter's own registry.
pub struct MetricFamilies {
    registry: Registry,
    features: FeatureSet,
    tags: CounterPair,
    headers: Option<CounterPair>,
    status: Option<CounterPair>,
    versions: Option<CounterPair>,
    probes: Option<HistogramVec>,
}

/// Running accumulators for one pipeline.
pub struct Accumulators {
    /// Handles for session-derived facts; clone one per classifier.
    pub sink: FactSink,
    /// Present when probe monitoring is enabled.
    pub probes: Option<Accumulator<ProbeSample>>,
    /// Consumer tasks; each finishes once its handles are dropped.
    pub consumers: Vec<JoinHandle<u64>>,
}

impl MetricFamilies {
    pub fn new(features: FeatureSet) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let status_label: &[&str] = if features.status_codes {
            &["statuscode"]
        } else {
            &[]
        };

        let tag_labels = [&["key", "hitmiss"][..], status_label].concat();
        let tags = register_pair(&registry, "custom", "Varnish custom", &tag_labels)?;

        let headers = if features.headers {
            let labels = [&["type", "header", "value", "hitmiss"][..], status_label].concat();
            Some(register_pair(&registry, "header", "Varnish header", &labels)?)
        } else {
            None
        };

        let status = if features.status_codes {
            Some(register_pair(
                &registry,
                "statuscode",
                "Varnish status code",
                &["statuscode", "hitmiss"],
            )?)
        } else {
            None
        };

        let versions = if features.http_version {
            Some(register_pair(
                &registry,
                "httpversion",
                "Varnish HTTP version",
                &["httpversion"],
            )?)
        } else {
            None
        };

        let probes = if features.probes {
            let latency = HistogramVec::new(
                HistogramOpts::new("probe_responsetime", "Varnish backend probe response time in seconds")
                    .namespace(NAMESPACE)
                    .buckets(PROBE_BUCKETS.to_vec()),
                &["probe"],
            )?;
            registry.register(Box::new(latency.clone()))?;
            Some(latency)
        } else {
            None
        };

        Ok(Self {
            registry,
            features,
            tags,
            headers,
            status,
            versions,
            probes,
        })
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawn one consumer task per registered family.
    pub fn start(&self, capacity: usize) -> Accumulators {
        let mut consumers = Vec::new();

        let (tags, task) = Accumulator::spawn(
            "custom",
            capacity,
            TagRecorder {
                pair: self.tags.clone(),
                with_status: self.features.status_codes,
            },
        );
        consumers.push(task);

        let headers = self.headers.clone().map(|pair| {
            let (acc, task) = Accumulator::spawn(
                "header",
                capacity,
                HeaderRecorder {
                    pair,
                    with_status: self.features.status_codes,
                },
            );
            consumers.push(task);
            acc
        });

        let status = self.status.clone().map(|pair| {
            let (acc, task) = Accumulator::spawn("statuscode", capacity, StatusRecorder { pair });
            consumers.push(task);
            acc
        });

        let versions = self.versions.clone().map(|pair| {
            let (acc, task) = Accumulator::spawn("httpversion", capacity, VersionRecorder { pair });
            consumers.push(task);
            acc
        });

        let probes = self.probes.clone().map(|latency| {
            let (acc, task) = Accumulator::spawn("probe", capacity, ProbeRecorder { latency });
            consumers.push(task);
            acc
        });

        info!(
            families = consumers.len(),
            capacity, "✓ Metric accumulators started"
        );

        Accumulators {
            sink: FactSink {
                tags,
                headers,
                status,
                versions,
            },
            probes,
            consumers,
        }
    }

    /// Prometheus text exposition of every registered family.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn register_pair(
    registry: &Registry,
    family: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterPair, MetricsError> {
    let count = IntCounterVec::new(
        Opts::new(format!("{family}_counter"), format!("{help} counters")).namespace(NAMESPACE),
        labels,
    )?;
    let size = IntCounterVec::new(
        Opts::new(format!("{family}_size"), format!("{help} sizes")).namespace(NAMESPACE),
        labels,
    )?;
    registry.register(Box::new(count.clone()))?;
    registry.register(Box::new(size.clone()))?;
    Ok(CounterPair { count, size })
}
