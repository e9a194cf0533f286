//! Apply facts to Prometheus vectors.
//!
//! Each recorder is owned by its family's consumer task, which makes it the
//! only writer for that family's counters.

use prometheus::{HistogramVec, IntCounterVec};

use super::accumulator::Recorder;
use crate::session::{HeaderFact, ProbeSample, StatusFact, TagFact, VersionFact, UNKNOWN_LABEL};

/// Parallel hit-count and byte-size counters sharing one label schema.
#[derive(Clone)]
pub struct CounterPair {
    pub count: IntCounterVec,
    pub size: IntCounterVec,
}

impl CounterPair {
    fn add(&self, labels: &[&str], bytes: u64) {
        self.count.with_label_values(labels).inc();
        self.size.with_label_values(labels).inc_by(bytes);
    }
}

pub struct TagRecorder {
    pub(super) pair: CounterPair,
    pub(super) with_status: bool,
}

impl Recorder for TagRecorder {
    type Fact = TagFact;

    fn record(&mut self, fact: TagFact) {
        let outcome = fact.outcome.as_str();
        if self.with_status {
            let status = fact.status.as_deref().unwrap_or(UNKNOWN_LABEL);
            self.pair.add(&[fact.key.as_str(), outcome, status], fact.bytes);
        } else {
            self.pair.add(&[fact.key.as_str(), outcome], fact.bytes);
        }
    }
}

pub struct HeaderRecorder {
    pub(super) pair: CounterPair,
    pub(super) with_status: bool,
}

impl Recorder for HeaderRecorder {
    type Fact = HeaderFact;

    fn record(&mut self, fact: HeaderFact) {
        let field = &fact.field;
        let direction = field.direction.as_str();
        let outcome = fact.outcome.as_str();
        if self.with_status {
            let status = fact.status.as_deref().unwrap_or(UNKNOWN_LABEL);
            self.pair.add(
                &[direction, field.name.as_str(), field.value.as_str(), outcome, status],
                fact.bytes,
            );
        } else {
            self.pair
                .add(&[direction, field.name.as_str(), field.value.as_str(), outcome], fact.bytes);
        }
    }
}

pub struct StatusRecorder {
    pub(super) pair: CounterPair,
}

impl Recorder for StatusRecorder {
    type Fact = StatusFact;

    fn record(&mut self, fact: StatusFact) {
        self.pair
            .add(&[fact.status.as_str(), fact.outcome.as_str()], fact.bytes);
    }
}

pub struct VersionRecorder {
    pub(super) pair: CounterPair,
}

impl Recorder for VersionRecorder {
    type Fact = VersionFact;

    fn record(&mut self, fact: VersionFact) {
        self.pair.add(&[fact.version.as_str()], fact.bytes);
    }
}

pub struct ProbeRecorder {
    pub(super) latency: HistogramVec,
}

impl Recorder for ProbeRecorder {
    type Fact = ProbeSample;

    fn record(&mut self, sample: ProbeSample) {
        self.latency
            .with_label_values(&[sample.probe.as_str()])
            .observe(sample.response_time);
    }
}
