//! Per-connection state machine from records to session facts.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, error};

use super::model::{Direction, HeaderField, Session};
use crate::config::FeatureSet;
use crate::filter::AttributeFilters;
use crate::metrics::FactSink;
use crate::source::LogRecord;
use crate::supervisor::{Flow, RecordHandler};

/// Record tags the classifier reacts to.
mod tag {
    pub const BEGIN: &str = "Begin";
    pub const END: &str = "End";
    pub const HIT: &str = "Hit";
    pub const HIT_PASS: &str = "HitPass";
    pub const VCL_CALL: &str = "VCL_call";
    pub const VCL_LOG: &str = "VCL_Log";
    pub const REQ_ACCT: &str = "ReqAcct";
    pub const RESP_STATUS: &str = "RespStatus";
    pub const REQ_PROTOCOL: &str = "ReqProtocol";
    pub const REQ_HEADER: &str = "ReqHeader";
    pub const RESP_HEADER: &str = "RespHeader";
}

const LOG_KEY_PREFIX: &str = "logkey:";

/// Owns one open session. A fresh classifier is built for every connection.
pub struct SessionClassifier {
    session: Session,
    filters: Arc<AttributeFilters>,
    features: FeatureSet,
    sink: FactSink,
    trace: bool,
}

impl SessionClassifier {
    pub fn new(filters: Arc<AttributeFilters>, features: FeatureSet, sink: FactSink) -> Self {
        Self {
            session: Session::default(),
            filters,
            features,
            sink,
            trace: false,
        }
    }

    /// Emit a debug event for every record seen.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// The session currently being built.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Apply one record. Returns the finished session on an End that closes
    /// an active session.
    pub fn observe(&mut self, record: &LogRecord) -> Option<Session> {
        if self.trace {
            debug!(
                vxid = record.vxid,
                tag = %record.tag,
                kind = %record.kind,
                payload = %record.payload,
                "record"
            );
        }

        let payload = record.payload.as_str();
        match record.tag.as_str() {
            tag::BEGIN => {
                if payload.starts_with("req") {
                    self.session = Session::begin();
                }
                None
            }
            tag::END => {
                if self.session.active {
                    self.session.active = false;
                    Some(mem::take(&mut self.session))
                } else {
                    None
                }
            }
            _ if !self.session.active => None,
            tag::HIT => {
                self.session.mark_hit();
                None
            }
            tag::HIT_PASS => {
                self.session.mark_hit_for_pass();
                None
            }
            tag::VCL_CALL => {
                self.session.apply_cache_decision(payload.trim());
                None
            }
            tag::REQ_ACCT => {
                self.session.record_accounting(payload);
                None
            }
            tag::RESP_STATUS => {
                if self.features.status_codes {
                    self.session.status_code = Some(payload.trim().to_string());
                }
                None
            }
            tag::REQ_PROTOCOL => {
                if self.features.http_version {
                    self.session.protocol_version = Some(payload.trim().to_string());
                }
                None
            }
            tag::VCL_LOG => {
                if let Some(key) = payload.strip_prefix(LOG_KEY_PREFIX) {
                    self.session.tags.push(key.to_string());
                }
                None
            }
            tag::REQ_HEADER => {
                self.capture_header(Direction::Request, payload);
                None
            }
            tag::RESP_HEADER => {
                self.capture_header(Direction::Response, payload);
                None
            }
            _ => None,
        }
    }

    fn capture_header(&mut self, direction: Direction, payload: &str) {
        let Some((name, value)) = payload.split_once(": ") else {
            return;
        };
        let name = name.to_ascii_lowercase();
        if self.filters.for_direction(direction).contains(&name) {
            self.session.headers.push(HeaderField {
                direction,
                name,
                value: value.to_string(),
            });
        }
    }
}

impl RecordHandler for SessionClassifier {
    fn handle(&mut self, record: LogRecord) -> Pin<Box<dyn Future<Output = Flow> + Send + '_>> {
        Box::pin(async move {
            let Some(session) = self.observe(&record) else {
                return Flow::Continue;
            };

            let facts = session.into_facts(&self.features);
            if facts.is_empty() {
                return Flow::Continue;
            }

            match self.sink.dispatch(facts).await {
                Ok(_) => Flow::Continue,
                Err(e) => {
                    error!(vxid = record.vxid, "Dropping classifier: {}", e);
                    Flow::Stop
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::HeaderFilter;
    use crate::metrics::Accumulator;
    use crate::session::{Outcome, TagFact};
    use crate::source::RecordKind;
    use tokio::sync::mpsc;

    fn classifier(features: FeatureSet, filters: AttributeFilters) -> SessionClassifier {
        let (tags, _rx) = Accumulator::with_receiver("custom", 1);
        let sink = FactSink {
            tags,
            headers: None,
            status: None,
            versions: None,
        };
        SessionClassifier::new(Arc::new(filters), features, sink)
    }

    fn plain() -> SessionClassifier {
        classifier(FeatureSet::default(), AttributeFilters::default())
    }

    fn feed(c: &mut SessionClassifier, records: &[(&str, &str)]) -> Vec<Session> {
        records
            .iter()
            .filter_map(|(tag, payload)| c.observe(&LogRecord::client(1, *tag, *payload)))
            .collect()
    }

    // ── Session boundaries ───────────────────────────────────────

    #[test]
    fn test_end_without_begin_is_noop() {
        let mut c = plain();
        let done = feed(&mut c, &[("VCL_Log", "logkey:x"), ("Hit", ""), ("End", "")]);
        assert!(done.is_empty());
        assert!(c.session().tags.is_empty());
    }

    #[test]
    fn test_only_request_begin_opens_session() {
        let mut c = plain();
        let done = feed(&mut c, &[("Begin", "sess 0 HTTP/1"), ("VCL_Log", "logkey:x"), ("End", "")]);
        assert!(done.is_empty());

        let done = feed(&mut c, &[("Begin", "req 1 rxreq"), ("VCL_Log", "logkey:x"), ("End", "")]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].tags, vec!["x"]);
        assert!(!done[0].active);
    }

    #[test]
    fn test_second_end_emits_nothing() {
        let mut c = plain();
        let done = feed(&mut c, &[("Begin", "req 1 rxreq"), ("End", ""), ("End", "")]);
        assert_eq!(done.len(), 1);
        assert!(!c.session().active);
    }

    #[test]
    fn test_new_begin_discards_open_session() {
        let mut c = plain();
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("VCL_Log", "logkey:lost"),
                ("Hit", ""),
                ("Begin", "req 2 rxreq"),
                ("VCL_Log", "logkey:kept"),
                ("End", ""),
            ],
        );
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].tags, vec!["kept"]);
        assert_eq!(done[0].outcome, Outcome::Unknown);
    }

    // ── Classification ───────────────────────────────────────────

    #[test]
    fn test_hit_for_pass_survives_pass() {
        let mut c = plain();
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("HitPass", "12345"),
                ("VCL_call", "PASS"),
                ("End", ""),
            ],
        );
        assert_eq!(done[0].outcome, Outcome::HitForPass);
    }

    #[test]
    fn test_accounting_and_malformed_accounting() {
        let mut c = plain();
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("ReqAcct", "0 0 0 0 0 512 0"),
                ("ReqAcct", "garbage"),
                ("End", ""),
            ],
        );
        assert_eq!(done[0].byte_size, 512);
    }

    #[test]
    fn test_vcl_log_without_prefix_is_ignored() {
        let mut c = plain();
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("VCL_Log", "something else"),
                ("VCL_Log", "logkey:a"),
                ("VCL_Log", "logkey:b"),
                ("End", ""),
            ],
        );
        assert_eq!(done[0].tags, vec!["a", "b"]);
    }

    #[test]
    fn test_status_and_protocol_only_when_tracked() {
        let records = [
            ("Begin", "req 1 rxreq"),
            ("RespStatus", "404"),
            ("ReqProtocol", "HTTP/2.0"),
            ("End", ""),
        ];

        let mut untracked = plain();
        let done = feed(&mut untracked, &records);
        assert_eq!(done[0].status_code, None);
        assert_eq!(done[0].protocol_version, None);

        let features = FeatureSet {
            status_codes: true,
            http_version: true,
            ..FeatureSet::default()
        };
        let mut tracked = classifier(features, AttributeFilters::default());
        let done = feed(&mut tracked, &records);
        assert_eq!(done[0].status_code.as_deref(), Some("404"));
        assert_eq!(done[0].protocol_version.as_deref(), Some("HTTP/2.0"));
    }

    // ── Headers ──────────────────────────────────────────────────

    #[test]
    fn test_headers_filtered_and_lowercased() {
        let filters = AttributeFilters::new(HeaderFilter::new(["Host"]), HeaderFilter::new(["X-Cache"]));
        let mut c = classifier(FeatureSet::default(), filters);
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("ReqHeader", "HOST: example.com"),
                ("ReqHeader", "User-Agent: curl/8"),
                ("ReqHeader", "X-Cache: from-request"),
                ("RespHeader", "X-Cache: HIT"),
                ("RespHeader", "Location: http://a.example:8080/"),
                ("ReqHeader", "Host:no-space"),
                ("End", ""),
            ],
        );

        assert_eq!(
            done[0].headers,
            vec![
                HeaderField {
                    direction: Direction::Request,
                    name: "host".to_string(),
                    value: "example.com".to_string(),
                },
                HeaderField {
                    direction: Direction::Response,
                    name: "x-cache".to_string(),
                    value: "HIT".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_header_value_keeps_later_separators() {
        let filters = AttributeFilters::new(HeaderFilter::default(), HeaderFilter::new(["location"]));
        let mut c = classifier(FeatureSet::default(), filters);
        let done = feed(
            &mut c,
            &[
                ("Begin", "req 1 rxreq"),
                ("RespHeader", "Location: a: b"),
                ("End", ""),
            ],
        );
        assert_eq!(done[0].headers[0].value, "a: b");
    }

    // ── Handler ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_handle_dispatches_tag_facts() {
        let (tags, mut rx): (Accumulator<TagFact>, mpsc::Receiver<TagFact>) =
            Accumulator::with_receiver("custom", 8);
        let sink = FactSink {
            tags,
            headers: None,
            status: None,
            versions: None,
        };
        let mut c = SessionClassifier::new(Arc::new(AttributeFilters::default()), FeatureSet::default(), sink)
            .with_trace(true);

        for (tag, payload) in [
            ("Begin", "req 1 rxreq"),
            ("VCL_Log", "logkey:cached"),
            ("Hit", ""),
            ("ReqAcct", "0 0 0 0 0 512 0"),
            ("End", ""),
        ] {
            let record = LogRecord::new(7, tag, RecordKind::Client, payload);
            assert_eq!(c.handle(record).await, Flow::Continue);
        }

        let fact = rx.recv().await.unwrap();
        assert_eq!(
            fact,
            TagFact {
                key: "cached".to_string(),
                outcome: Outcome::Hit,
                bytes: 512,
                status: None,
            }
        );
    }

    #[tokio::test]
    async fn test_handle_keeps_tag_facts_when_header_family_missing() {
        let (tags, mut rx) = Accumulator::with_receiver("custom", 8);
        let sink = FactSink {
            tags,
            headers: None,
            status: None,
            versions: None,
        };
        let filters = AttributeFilters::new(HeaderFilter::new(["host"]), HeaderFilter::default());
        let mut c = SessionClassifier::new(Arc::new(filters), FeatureSet::default(), sink);

        for (tag, payload) in [
            ("Begin", "req 1 rxreq"),
            ("ReqHeader", "Host: example.com"),
            ("VCL_Log", "logkey:api"),
            ("End", ""),
        ] {
            assert_eq!(c.handle(LogRecord::client(3, tag, payload)).await, Flow::Continue);
        }

        assert_eq!(rx.recv().await.unwrap().key, "api");
    }

    #[tokio::test]
    async fn test_handle_stops_when_sink_closed() {
        let mut c = plain();
        for tag in ["Begin", "VCL_Log"] {
            let payload = if tag == "Begin" { "req 1 rxreq" } else { "logkey:x" };
            assert_eq!(c.handle(LogRecord::client(1, tag, payload)).await, Flow::Continue);
        }
        assert_eq!(c.handle(LogRecord::client(1, "End", "")).await, Flow::Stop);
    }
}
