//! Backend health-probe latency from the raw record stream.
//!
//! `Backend_health` payloads look like
//! `boot.default Still healthy 4---X-RH 5 3 5 0.000476 0.000523 HTTP/1.1 200 OK`:
//! field 0 names the probe, field 7 is the response time in seconds.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, error};

use crate::metrics::Accumulator;
use crate::session::ProbeSample;
use crate::source::LogRecord;
use crate::supervisor::{Flow, RecordHandler};

pub const BACKEND_HEALTH: &str = "Backend_health";

const RESPONSE_TIME_FIELD: usize = 7;

/// Extract a sample from a `Backend_health` payload.
///
/// The probe name is the text after the last `.` of the first field, or the
/// whole field when there is no dot. Missing or unparsable fields yield `None`.
pub fn parse_probe_sample(payload: &str) -> Option<ProbeSample> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    let id = *fields.first()?;
    let probe = match id.rsplit_once('.') {
        Some((_, name)) => name,
        None => id,
    };
    if probe.is_empty() {
        return None;
    }

    let response_time: f64 = fields.get(RESPONSE_TIME_FIELD)?.parse().ok()?;
    if !response_time.is_finite() {
        return None;
    }

    Some(ProbeSample {
        probe: probe.to_string(),
        response_time,
    })
}

/// Classifier-free consumer of the raw stream.
pub struct ProbeMonitor {
    probes: Accumulator<ProbeSample>,
    trace: bool,
}

impl ProbeMonitor {
    pub fn new(probes: Accumulator<ProbeSample>) -> Self {
        Self {
            probes,
            trace: false,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

impl RecordHandler for ProbeMonitor {
    fn handle(&mut self, record: LogRecord) -> Pin<Box<dyn Future<Output = Flow> + Send + '_>> {
        Box::pin(async move {
            if record.tag != BACKEND_HEALTH {
                return Flow::Continue;
            }
            if self.trace {
                debug!(vxid = record.vxid, payload = %record.payload, "probe record");
            }

            let Some(sample) = parse_probe_sample(&record.payload) else {
                return Flow::Continue;
            };

            match self.probes.enqueue(sample).await {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    error!("Dropping probe monitor: {}", e);
                    Flow::Stop
                }
            }
        })
    }
}
