//! Immutable per-family records derived from a finished session.
//!
//! A fact is moved into exactly one accumulator queue; nothing else keeps
//! a reference to it.

use crate::config::FeatureSet;

use super::model::{HeaderField, Outcome, Session, UNKNOWN_LABEL};

/// One `logkey:` tag of a finished transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFact {
    pub key: String,
    pub outcome: Outcome,
    pub bytes: u64,
    /// Present only when status-code tracking is enabled.
    pub status: Option<String>,
}

/// One captured header of a finished transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFact {
    pub field: HeaderField,
    pub outcome: Outcome,
    pub bytes: u64,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFact {
    pub status: String,
    pub outcome: Outcome,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFact {
    pub version: String,
    pub bytes: u64,
}

/// A backend health-probe latency sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub probe: String,
    pub response_time: f64,
}

/// Everything a single transaction contributes, grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFacts {
    pub tags: Vec<TagFact>,
    pub headers: Vec<HeaderFact>,
    pub status: Option<StatusFact>,
    pub version: Option<VersionFact>,
}

impl SessionFacts {
    pub fn len(&self) -> usize {
        self.tags.len()
            + self.headers.len()
            + usize::from(self.status.is_some())
            + usize::from(self.version.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Session {
    /// Split the session into facts for the families enabled in `features`.
    pub fn into_facts(self, features: &FeatureSet) -> SessionFacts {
        let outcome = self.outcome;
        let bytes = self.byte_size;
        let status_label = features.status_codes.then(|| {
            self.status_code
                .clone()
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
        });

        let tags = self
            .tags
            .into_iter()
            .map(|key| TagFact {
                key,
                outcome,
                bytes,
                status: status_label.clone(),
            })
            .collect();

        let headers = self
            .headers
            .into_iter()
            .map(|field| HeaderFact {
                field,
                outcome,
                bytes,
                status: status_label.clone(),
            })
            .collect();

        let status = status_label.clone().map(|status| StatusFact {
            status,
            outcome,
            bytes,
        });

        let version = features.http_version.then(|| VersionFact {
            version: self
                .protocol_version
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            bytes,
        });

        SessionFacts {
            tags,
            headers,
            status,
            version,
        }
    }
}
