//! End-to-end: scripted log source → supervisor → classifier → accumulators.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use exporter::config::FeatureSet;
use exporter::filter::{AttributeFilters, HeaderFilter};
use exporter::metrics::{Accumulators, MetricFamilies};
use exporter::session::SessionClassifier;
use exporter::source::fake::FakeConnection;
use exporter::source::{FakeSource, Grouping, LogRecord};
use exporter::source::VarnishlogSource;
use exporter::supervisor::{Cycle, Pause, SourceSupervisor, SupervisorState};

struct NoPause;

impl Pause for NoPause {
    fn pause(&self, _delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

fn transaction(vxid: u64, records: &[(&str, &str)]) -> Vec<LogRecord> {
    let mut out = vec![LogRecord::client(vxid, "Begin", "req 1 rxreq")];
    out.extend(
        records
            .iter()
            .map(|(tag, payload)| LogRecord::client(vxid, *tag, *payload)),
    );
    out.push(LogRecord::client(vxid, "End", ""));
    out
}

/// Run every scripted connection through one supervisor, then drain the
/// accumulators and return the exposition text.
async fn run_pipeline(
    features: FeatureSet,
    filters: AttributeFilters,
    script: Vec<FakeConnection>,
) -> String {
    let connections = script.len();
    let families = MetricFamilies::new(features).unwrap();
    let Accumulators {
        sink,
        probes,
        consumers,
    } = families.start(4);
    drop(probes);

    let filters = Arc::new(filters);
    let fake = Arc::new(FakeSource::scripted(script));
    let mut supervisor = SourceSupervisor::new("requests", fake, "", Grouping::Request, move || {
        SessionClassifier::new(Arc::clone(&filters), features, sink.clone())
    })
    .with_pause(Arc::new(NoPause));

    for _ in 0..connections {
        let cycle = supervisor.run_cycle().await;
        assert_ne!(cycle, Cycle::OpenFailed);
    }
    drop(supervisor);

    for consumer in consumers {
        consumer.await.unwrap();
    }
    families.encode().unwrap()
}

#[tokio::test]
async fn test_cached_hit_scenario() {
    let records = transaction(
        1,
        &[
            ("VCL_Log", "logkey:cached"),
            ("Hit", "5 119.99 10.0 0.0"),
            ("ReqAcct", "0 0 0 0 0 512 0"),
        ],
    );
    let text = run_pipeline(
        FeatureSet::default(),
        AttributeFilters::default(),
        vec![FakeConnection::Records(records)],
    )
    .await;

    assert!(text.contains("varnish_custom_counter{hitmiss=\"HIT\",key=\"cached\"} 1"));
    assert!(text.contains("varnish_custom_size{hitmiss=\"HIT\",key=\"cached\"} 512"));
}

#[tokio::test]
async fn test_partial_session_dropped_on_reconnect() {
    let broken = vec![
        LogRecord::client(1, "Begin", "req 1 rxreq"),
        LogRecord::client(1, "VCL_Log", "logkey:lost"),
    ];
    let complete = transaction(2, &[("VCL_Log", "logkey:kept"), ("VCL_call", "MISS")]);
    let mut end_only = vec![LogRecord::client(1, "End", "")];
    end_only.extend(complete);

    let text = run_pipeline(
        FeatureSet::default(),
        AttributeFilters::default(),
        vec![
            FakeConnection::RecordsThenError(broken, "varnishlog exited".to_string()),
            FakeConnection::Records(end_only),
        ],
    )
    .await;

    assert!(!text.contains("lost"));
    assert!(text.contains("varnish_custom_counter{hitmiss=\"MISS\",key=\"kept\"} 1"));
}

#[tokio::test]
async fn test_headers_status_and_version() {
    let features = FeatureSet {
        headers: true,
        status_codes: true,
        http_version: true,
        probes: false,
    };
    let filters = AttributeFilters::new(HeaderFilter::new(["host"]), HeaderFilter::default());

    let mut records = transaction(
        1,
        &[
            ("ReqProtocol", "HTTP/1.1"),
            ("ReqHeader", "Host: example.com"),
            ("ReqHeader", "Cookie: secret"),
            ("HitPass", "12 120.0"),
            ("VCL_call", "PASS"),
            ("RespStatus", "200"),
            ("ReqAcct", "10 0 10 100 900 1000"),
        ],
    );
    records.extend(transaction(2, &[("ReqAcct", "1 0 1 1 1 2")]));

    let text = run_pipeline(features, filters, vec![FakeConnection::Records(records)]).await;

    assert!(text.contains(
        "varnish_header_counter{header=\"host\",hitmiss=\"HITFORPASS\",statuscode=\"200\",type=\"req\",value=\"example.com\"} 1"
    ));
    assert!(!text.contains("cookie"));
    assert!(text.contains("varnish_statuscode_counter{hitmiss=\"HITFORPASS\",statuscode=\"200\"} 1"));
    assert!(text.contains("varnish_statuscode_counter{hitmiss=\"UNKNOWN\",statuscode=\"UNKNOWN\"} 1"));
    assert!(text.contains("varnish_httpversion_counter{httpversion=\"HTTP/1.1\"} 1"));
    assert!(text.contains("varnish_httpversion_size{httpversion=\"HTTP/1.1\"} 1000"));
    assert!(text.contains("varnish_httpversion_size{httpversion=\"UNKNOWN\"} 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_classifiers_lose_no_updates() {
    let families = MetricFamilies::new(FeatureSet::default()).unwrap();
    let Accumulators {
        sink, consumers, ..
    } = families.start(2);

    let mut supervisors = Vec::new();
    for worker in 0..4u64 {
        let mut records = Vec::new();
        for i in 0..250 {
            records.extend(transaction(
                worker * 1000 + i,
                &[("VCL_Log", "logkey:load"), ("ReqAcct", "0 0 0 0 0 3 0")],
            ));
        }
        let fake = Arc::new(FakeSource::scripted([FakeConnection::Records(records)]));
        let sink = sink.clone();
        supervisors.push(tokio::spawn(async move {
            let mut supervisor = SourceSupervisor::new("requests", fake, "", Grouping::Request, move || {
                SessionClassifier::new(Arc::new(AttributeFilters::default()), FeatureSet::default(), sink.clone())
            });
            supervisor.run_cycle().await
        }));
    }
    drop(sink);

    for handle in supervisors {
        assert_eq!(handle.await.unwrap(), Cycle::StreamEnded { records: 1000 });
    }
    for consumer in consumers {
        consumer.await.unwrap();
    }

    let text = families.encode().unwrap();
    assert!(text.contains("varnish_custom_counter{hitmiss=\"UNKNOWN\",key=\"load\"} 1000"));
    assert!(text.contains("varnish_custom_size{hitmiss=\"UNKNOWN\",key=\"load\"} 3000"));
}

/// A `varnishlog` that outlives the open grace window, then fails to attach.
#[cfg(unix)]
#[tokio::test]
async fn test_varnishlog_that_cannot_attach_is_retried_after_delay() {
    use std::os::unix::fs::PermissionsExt;

    #[derive(Default)]
    struct Recorded(parking_lot::Mutex<Vec<Duration>>);

    impl Pause for Recorded {
        fn pause(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.0.lock().push(delay);
            Box::pin(async {})
        }
    }

    let path = std::env::temp_dir().join(format!("varnishlog-no-varnishd-{}", std::process::id()));
    std::fs::write(
        &path,
        "#!/bin/sh\nsleep 1\necho 'VSM: Could not get hold of varnishd' >&2\nexit 1\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let families = MetricFamilies::new(FeatureSet::default()).unwrap();
    let Accumulators { sink, .. } = families.start(4);
    let pause = Arc::new(Recorded::default());
    let source = Arc::new(VarnishlogSource::new(path.to_string_lossy()));
    let mut supervisor = SourceSupervisor::new("requests", source, "", Grouping::Request, move || {
        SessionClassifier::new(Arc::new(AttributeFilters::default()), FeatureSet::default(), sink.clone())
    })
    .with_pause(pause.clone());

    let cycle = supervisor.run_cycle().await;
    std::fs::remove_file(&path).ok();

    assert_eq!(cycle, Cycle::OpenFailed);
    assert_eq!(*pause.0.lock(), vec![Duration::from_secs(5)]);
    assert_eq!(supervisor.consecutive_failures(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Disconnected);
}
