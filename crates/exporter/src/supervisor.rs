//! Keeps one log-source connection alive and feeds its records
//! to a per-connection handler.
//!
//! Lifecycle: `Disconnected → Connecting → Streaming → Disconnected`. A failed
//! open is reported and retried after a fixed delay; a stream that ends or
//! errors is released and reopened immediately with a fresh handler, so any
//! partial transaction from the old connection is discarded. A stream whose
//! first item is an open failure counts as a failed open.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::source::{LogRecord, LogSource, SourceError, Subscription};

/// Delay after a failed open before the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connection state published on the supervisor's watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
}

/// What a handler wants after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop supervising entirely. Only used when the downstream pipeline is gone.
    Stop,
}

/// Consumes records from one connection, in delivery order.
pub trait RecordHandler: Send {
    fn handle(&mut self, record: LogRecord) -> Pin<Box<dyn Future<Output = Flow> + Send + '_>>;
}

/// Waits out the retry delay. Swappable so tests do not sleep.
pub trait Pause: Send + Sync {
    fn pause(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real-time pause backed by `tokio::time::sleep`.
pub struct TokioPause;

impl Pause for TokioPause {
    fn pause(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Result of one connect-and-stream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    OpenFailed,
    StreamEnded { records: u64 },
    StreamFailed { records: u64 },
    Stopped { records: u64 },
}

pub struct SourceSupervisor<F> {
    name: String,
    source: Arc<dyn LogSource>,
    instance: String,
    subscription: Subscription,
    retry_delay: Duration,
    pause: Arc<dyn Pause>,
    make_handler: F,
    state_tx: watch::Sender<SupervisorState>,
    consecutive_failures: u32,
}

impl<F, H> SourceSupervisor<F>
where
    F: FnMut() -> H + Send,
    H: RecordHandler,
{
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn LogSource>,
        instance: impl Into<String>,
        subscription: impl Into<Subscription>,
        make_handler: F,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            name: name.into(),
            source,
            instance: instance.into(),
            subscription: subscription.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            pause: Arc::new(TokioPause),
            make_handler,
            state_tx,
            consecutive_failures: 0,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch the connection state. Receivers always see the latest value.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn set_state(&self, state: SupervisorState) {
        self.state_tx.send_replace(state);
    }

    /// Supervise until a handler asks to stop. Open failures never end the loop.
    pub async fn run(mut self) {
        info!(
            source = %self.name,
            instance = %self.instance,
            grouping = self.subscription.grouping.as_arg(),
            include = ?self.subscription.include,
            "Starting log source supervisor (retry delay: {}s)",
            self.retry_delay.as_secs()
        );

        loop {
            if let Cycle::Stopped { records } = self.run_cycle().await {
                info!(source = %self.name, records, "Log source supervisor stopped");
                break;
            }
        }
    }

    /// One attempt: open, stream to a fresh handler, release.
    ///
    /// On open failure this also waits out the retry delay.
    pub async fn run_cycle(&mut self) -> Cycle {
        self.set_state(SupervisorState::Connecting);
        debug!(source = %self.name, "Opening log source");

        let mut stream = match self.source.open(&self.instance, &self.subscription).await {
            Ok(stream) => stream,
            Err(e) => return self.open_failed(e).await,
        };

        let prior_failures = self.consecutive_failures;
        self.report_connected(prior_failures);
        self.consecutive_failures = 0;
        self.set_state(SupervisorState::Streaming);

        let mut handler = (self.make_handler)();
        let mut records: u64 = 0;

        let cycle = loop {
            match stream.next().await {
                Some(Ok(record)) => {
                    records = records.saturating_add(1);
                    if handler.handle(record).await == Flow::Stop {
                        break Cycle::Stopped { records };
                    }
                }
                // The handle never attached; nothing was delivered to the handler.
                Some(Err(e @ SourceError::OpenFailed { .. })) if records == 0 => {
                    drop(stream);
                    drop(handler);
                    self.consecutive_failures = prior_failures;
                    return self.open_failed(e).await;
                }
                Some(Err(e)) => {
                    warn!(source = %self.name, records, "Log stream failed: {}", e);
                    break Cycle::StreamFailed { records };
                }
                None => {
                    info!(source = %self.name, records, "Log stream ended, reconnecting");
                    break Cycle::StreamEnded { records };
                }
            }
        };

        drop(stream);
        drop(handler);
        self.set_state(SupervisorState::Disconnected);
        cycle
    }

    /// Report a failed open and wait out the retry delay.
    async fn open_failed(&mut self, e: SourceError) -> Cycle {
        self.set_state(SupervisorState::Disconnected);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        error!(
            source = %self.name,
            "Failed to open log source (attempt {}): {}",
            self.consecutive_failures, e
        );
        if self.consecutive_failures >= 3 {
            warn!(
                source = %self.name,
                "Log source has failed to open {} times consecutively - is varnishd running?",
                self.consecutive_failures
            );
        }
        self.pause.pause(self.retry_delay).await;
        Cycle::OpenFailed
    }

    fn report_connected(&self, prior_failures: u32) {
        if prior_failures > 0 {
            info!(
                source = %self.name,
                "✓ Log source reconnected after {} failed attempts",
                prior_failures
            );
        } else {
            info!(source = %self.name, "✓ Log source connected");
        }
    }
}
