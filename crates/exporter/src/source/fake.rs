//! Test double for the log source.
//!
//! Provides a deterministic [`FakeSource`] that implements [`LogSource`]
//! from a script of canned connections. Each `open` pops the next entry;
//! an exhausted script reports the source as unavailable.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;

use super::{Grouping, LogRecord, LogSource, RecordStream, Result, SourceError, Subscription};

/// One scripted `open` outcome.
#[derive(Debug, Clone)]
pub enum FakeConnection {
    /// The open fails with the given message.
    Fail(String),
    /// The open succeeds, yields these records, then ends cleanly.
    Records(Vec<LogRecord>),
    /// The open succeeds, yields these records, then fails mid-stream.
    RecordsThenError(Vec<LogRecord>, String),
    /// The open succeeds but the handle never attaches: the stream's only
    /// item is an open failure with this stderr.
    NeverAttached(String),
}

/// An `open` call as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCall {
    pub instance: String,
    pub grouping: Grouping,
    pub include: Vec<String>,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<FakeConnection>,
    opens: Vec<OpenCall>,
}

/// A fake log source for deterministic testing.
#[derive(Default)]
pub struct FakeSource {
    inner: Mutex<Inner>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fake from a full script.
    pub fn scripted(script: impl IntoIterator<Item = FakeConnection>) -> Self {
        let fake = Self::new();
        fake.inner.lock().script.extend(script);
        fake
    }

    /// Append one scripted connection.
    pub fn push(&self, connection: FakeConnection) {
        self.inner.lock().script.push_back(connection);
    }

    /// Every `open` call made so far, in order.
    pub fn opens(&self) -> Vec<OpenCall> {
        self.inner.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().opens.len()
    }

    fn next(&self, instance: &str, subscription: &Subscription) -> Option<FakeConnection> {
        let mut inner = self.inner.lock();
        inner.opens.push(OpenCall {
            instance: instance.to_string(),
            grouping: subscription.grouping,
            include: subscription.include.clone(),
        });
        inner.script.pop_front()
    }
}

impl LogSource for FakeSource {
    fn open<'a>(
        &'a self,
        instance: &'a str,
        subscription: &'a Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream>> + Send + 'a>> {
        let connection = self.next(instance, subscription);
        Box::pin(async move {
            match connection {
                None => Err(SourceError::Unavailable("fake script exhausted".to_string())),
                Some(FakeConnection::Fail(message)) => Err(SourceError::Unavailable(message)),
                Some(FakeConnection::Records(records)) => {
                    let stream: RecordStream = Box::pin(tokio_stream::iter(
                        records.into_iter().map(Ok::<_, SourceError>),
                    ));
                    Ok(stream)
                }
                Some(FakeConnection::RecordsThenError(records, message)) => {
                    let stream: RecordStream = Box::pin(async_stream::stream! {
                        for record in records {
                            yield Ok(record);
                        }
                        yield Err(SourceError::Io(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            message,
                        )));
                    });
                    Ok(stream)
                }
                Some(FakeConnection::NeverAttached(stderr)) => {
                    let stream: RecordStream = Box::pin(tokio_stream::once(Err(SourceError::OpenFailed {
                        status: "exit status: 1".to_string(),
                        stderr,
                    })));
                    Ok(stream)
                }
            }
        })
    }
}
