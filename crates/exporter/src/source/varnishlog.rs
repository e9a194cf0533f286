//! Live log source backed by the `varnishlog` CLI.
//!
//! The shared-memory log is read by `varnishlog` itself; this side only
//! launches it, watches for an immediate failure, and parses its text
//! output line by line.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use super::parse::{parse_raw_line, GroupedLineParser};
use super::{Grouping, LogSource, RecordStream, Result, SourceError, Subscription};

/// How long a freshly launched `varnishlog` must stay alive before the open
/// counts as successful. With `-t 0` a missing instance exits well within this.
const OPEN_GRACE: Duration = Duration::from_millis(500);

/// Seconds `varnishlog` waits for the shared-memory log before giving up.
/// Retrying is the supervisor's job, so it must not wait at all.
const ATTACH_TIMEOUT: &str = "0";

/// Cap on how much stderr is kept for an open-failure report.
const MAX_STDERR_BYTES: usize = 4096;

pub struct VarnishlogSource {
    program: String,
}

impl VarnishlogSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the command line for one handle.
    fn command(&self, instance: &str, subscription: &Subscription) -> Command {
        let mut cmd = Command::new(&self.program);
        if !instance.is_empty() {
            cmd.arg("-n").arg(instance);
        }
        cmd.arg("-t").arg(ATTACH_TIMEOUT);
        cmd.arg("-g").arg(subscription.grouping.as_arg());
        for tag in &subscription.include {
            cmd.arg("-i").arg(tag);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn spawn(&self, instance: &str, subscription: &Subscription) -> Result<RecordStream> {
        let grouping = subscription.grouping;
        let mut child = self
            .command(instance, subscription)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Unavailable("stdout was not captured".to_string()))?;
        let mut stderr = child.stderr.take();

        match time::timeout(OPEN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                let stderr = match stderr.take() {
                    Some(pipe) => read_stderr(pipe).await,
                    None => String::new(),
                };
                return Err(SourceError::OpenFailed {
                    status: status.to_string(),
                    stderr,
                });
            }
            Ok(Err(e)) => return Err(SourceError::Io(e)),
            Err(_) => {
                debug!(program = %self.program, instance, grouping = grouping.as_arg(), "varnishlog is running");
            }
        }

        let process = VarnishlogProcess {
            child,
            stderr: stderr.map(|pipe| tokio::spawn(forward_stderr(pipe))),
        };
        Ok(record_stream(stdout, grouping, Some(process)))
    }
}

impl LogSource for VarnishlogSource {
    fn open<'a>(
        &'a self,
        instance: &'a str,
        subscription: &'a Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream>> + Send + 'a>> {
        Box::pin(self.spawn(instance, subscription))
    }
}

/// A running `varnishlog` behind a record stream.
pub struct VarnishlogProcess {
    child: Child,
    /// Forwards stderr to the log and hands back its tail once the pipe closes.
    stderr: Option<JoinHandle<String>>,
}

impl VarnishlogProcess {
    /// Reap the child after its stdout closed.
    ///
    /// A failed exit before any record was delivered means `varnishlog` never
    /// attached, which is reported as an open failure.
    async fn finish(mut self, records: u64) -> Option<SourceError> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(SourceError::Io(e)),
        };
        if status.success() {
            return None;
        }

        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if records == 0 {
            return Some(SourceError::OpenFailed {
                status: status.to_string(),
                stderr,
            });
        }
        warn!(%status, records, "varnishlog exited: {}", stderr);
        None
    }
}

/// Turn a byte stream of `varnishlog` output into records.
///
/// The process, if any, lives as long as the stream and is killed when the
/// stream is dropped. Invalid UTF-8 is replaced rather than treated as an error.
pub fn record_stream<R>(reader: R, grouping: Grouping, process: Option<VarnishlogProcess>) -> RecordStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut process = process;
        let mut reader = BufReader::new(reader);
        let mut grouped = GroupedLineParser::new();
        let mut buf = Vec::with_capacity(512);
        let mut records: u64 = 0;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    if let Some(process) = process.take() {
                        if let Some(err) = process.finish(records).await {
                            yield Err(err);
                        }
                    }
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let record = match grouping {
                        Grouping::Request => grouped.parse(&line),
                        Grouping::Raw => parse_raw_line(&line),
                    };
                    if let Some(record) = record {
                        records += 1;
                        yield Ok(record);
                    }
                }
                Err(e) => {
                    yield Err(SourceError::Io(e));
                    break;
                }
            }
        }
    })
}

async fn read_stderr(pipe: ChildStderr) -> String {
    let mut captured = String::new();
    let mut limited = pipe.take(MAX_STDERR_BYTES as u64);
    if let Err(e) = limited.read_to_string(&mut captured).await {
        debug!(error = %e, "could not read varnishlog stderr");
    }
    captured.trim().to_string()
}

async fn forward_stderr(pipe: ChildStderr) -> String {
    let mut lines = BufReader::new(pipe).lines();
    let mut tail = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                let line = line.trim();
                warn!(target: "varnishlog", "{}", line);
                if tail.len() + line.len() < MAX_STDERR_BYTES {
                    if !tail.is_empty() {
                        tail.push('\n');
                    }
                    tail.push_str(line);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    tail
}
