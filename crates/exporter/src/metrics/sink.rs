//! Fans a finished session's facts out to the family accumulators.

use tracing::error;

use super::accumulator::{Accumulator, AccumulatorClosed};
use crate::session::{HeaderFact, SessionFacts, StatusFact, TagFact, VersionFact};

/// Producer handles for every session-derived family.
///
/// Optional families are `None` when their tracking is disabled. The
/// classifier feeding this sink must be built from the same feature set.
#[derive(Clone)]
pub struct FactSink {
    pub tags: Accumulator<TagFact>,
    pub headers: Option<Accumulator<HeaderFact>>,
    pub status: Option<Accumulator<StatusFact>>,
    pub versions: Option<Accumulator<VersionFact>>,
}

impl FactSink {
    /// Enqueue every fact, waiting on full queues.
    ///
    /// Returns how many facts belonged to a family with no accumulator.
    /// Those are logged as errors and not counted.
    pub async fn dispatch(&self, facts: SessionFacts) -> Result<usize, AccumulatorClosed> {
        let mut unrouted = 0;

        for fact in facts.tags {
            self.tags.enqueue(fact).await?;
        }

        match &self.headers {
            Some(acc) => {
                for fact in facts.headers {
                    acc.enqueue(fact).await?;
                }
            }
            None => unrouted += report_unrouted("header", facts.headers.len()),
        }

        match (&self.status, facts.status) {
            (Some(acc), Some(fact)) => acc.enqueue(fact).await?,
            (None, Some(_)) => unrouted += report_unrouted("statuscode", 1),
            (_, None) => {}
        }

        match (&self.versions, facts.version) {
            (Some(acc), Some(fact)) => acc.enqueue(fact).await?,
            (None, Some(_)) => unrouted += report_unrouted("httpversion", 1),
            (_, None) => {}
        }

        Ok(unrouted)
    }
}

fn report_unrouted(family: &str, count: usize) -> usize {
    if count > 0 {
        error!(family, count, "Dropping facts for a family that is not registered");
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Direction, HeaderField, Outcome};

    fn facts() -> SessionFacts {
        SessionFacts {
            tags: vec![TagFact {
                key: "api".to_string(),
                outcome: Outcome::Hit,
                bytes: 10,
                status: None,
            }],
            headers: vec![HeaderFact {
                field: HeaderField {
                    direction: Direction::Request,
                    name: "host".to_string(),
                    value: "a".to_string(),
                },
                outcome: Outcome::Hit,
                bytes: 10,
                status: None,
            }],
            status: None,
            version: Some(VersionFact {
                version: "HTTP/2.0".to_string(),
                bytes: 10,
            }),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_each_family() {
        let (tags, mut tag_rx) = Accumulator::with_receiver("tag", 4);
        let (headers, mut header_rx) = Accumulator::with_receiver("header", 4);
        let (versions, mut version_rx) = Accumulator::with_receiver("httpversion", 4);
        let sink = FactSink {
            tags,
            headers: Some(headers),
            status: None,
            versions: Some(versions),
        };

        assert_eq!(sink.dispatch(facts()).await.unwrap(), 0);

        assert_eq!(tag_rx.recv().await.unwrap().key, "api");
        assert_eq!(header_rx.recv().await.unwrap().field.name, "host");
        assert_eq!(version_rx.recv().await.unwrap().version, "HTTP/2.0");
    }

    #[tokio::test]
    async fn test_dispatch_reports_closed_family() {
        let (tags, tag_rx) = Accumulator::with_receiver("tag", 4);
        drop(tag_rx);
        let sink = FactSink {
            tags,
            headers: None,
            status: None,
            versions: None,
        };

        let err = sink.dispatch(facts()).await.unwrap_err();
        assert_eq!(err.family, "tag");
    }

    #[tokio::test]
    async fn test_dispatch_reports_facts_without_family() {
        let (tags, mut tag_rx) = Accumulator::with_receiver("tag", 4);
        let sink = FactSink {
            tags,
            headers: None,
            status: None,
            versions: None,
        };

        // One header fact and one version fact have nowhere to go.
        assert_eq!(sink.dispatch(facts()).await.unwrap(), 2);
        assert_eq!(tag_rx.recv().await.unwrap().key, "api");
    }
}
