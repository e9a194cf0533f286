//! The boundary with the Varnish shared-memory log.
//!
//! Every consumer reaches the log through the [`LogSource`] trait.
//! `varnishlog.rs` provides the real implementation backed by the
//! `varnishlog` CLI; `fake.rs` provides a scripted test double.

pub mod fake;
pub mod parse;
pub mod varnishlog;

pub use fake::FakeSource;
pub use varnishlog::VarnishlogSource;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio_stream::Stream;

/// Standard Result type for the source module
pub type Result<T> = std::result::Result<T, SourceError>;

/// Recoverable log-source failures. None of these are fatal; the
/// supervisor reports them and retries.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Log source could not attach ({status}): {stderr}")]
    OpenFailed { status: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log source unavailable: {0}")]
    Unavailable(String),
}

/// How records are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Records grouped per client request, in transaction order.
    Request,
    /// Flat records as they are written, including non-transactional ones.
    Raw,
}

impl Grouping {
    /// Value for the `varnishlog -g` option.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Grouping::Request => "request",
            Grouping::Raw => "raw",
        }
    }
}

/// What one handle delivers: the grouping plus an optional tag allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub grouping: Grouping,
    /// Only these tags are delivered. Empty means every tag.
    pub include: Vec<String>,
}

impl Subscription {
    pub fn new(grouping: Grouping) -> Self {
        Self {
            grouping,
            include: Vec::new(),
        }
    }

    /// Restrict delivery to `tag`. May be called repeatedly.
    pub fn include(mut self, tag: impl Into<String>) -> Self {
        self.include.push(tag.into());
        self
    }
}

impl From<Grouping> for Subscription {
    fn from(grouping: Grouping) -> Self {
        Self::new(grouping)
    }
}

/// Which side of Varnish produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordKind {
    Client,
    Backend,
    #[default]
    Other,
}

impl RecordKind {
    /// Parse the type column of raw output (`c`, `b`, `-`).
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "c" => RecordKind::Client,
            "b" => RecordKind::Backend,
            _ => RecordKind::Other,
        }
    }

    /// Parse the transaction label of a grouped header (`Request`, `BeReq`, ...).
    pub fn from_group_label(label: &str) -> Self {
        match label {
            "Request" => RecordKind::Client,
            "BeReq" => RecordKind::Backend,
            _ => RecordKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Client => "c",
            RecordKind::Backend => "b",
            RecordKind::Other => "-",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log record: `(transaction id, tag, kind, payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub vxid: u64,
    pub tag: String,
    pub kind: RecordKind,
    pub payload: String,
}

impl LogRecord {
    pub fn new(vxid: u64, tag: impl Into<String>, kind: RecordKind, payload: impl Into<String>) -> Self {
        Self {
            vxid,
            tag: tag.into(),
            kind,
            payload: payload.into(),
        }
    }

    /// Shorthand for a client-side record, mostly used by tests.
    pub fn client(vxid: u64, tag: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(vxid, tag, RecordKind::Client, payload)
    }
}

/// An open log handle. Dropping the stream closes the handle.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<LogRecord>> + Send>>;

/// Open a log handle for a Varnish instance.
///
/// A handle that cannot attach may also report [`SourceError::OpenFailed`]
/// as the first stream item instead of failing `open` itself.
///
/// Object-safe thanks to the `Pin<Box<…>>` return so it can be shared as
/// `Arc<dyn LogSource>` between supervisors.
pub trait LogSource: Send + Sync {
    fn open<'a>(
        &'a self,
        instance: &'a str,
        subscription: &'a Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream>> + Send + 'a>>;
}
