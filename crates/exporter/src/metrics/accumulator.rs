//! A bounded queue in front of a single-writer counter set.
//!
//! Producers `enqueue` facts; one consumer task per family drains the queue
//! and applies each fact to its [`Recorder`]. A full queue makes `enqueue`
//! wait, so facts are never dropped.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Applies facts to a counter set. Owned by exactly one consumer task.
pub trait Recorder: Send + 'static {
    type Fact: Send + 'static;

    fn record(&mut self, fact: Self::Fact);
}

/// The consumer behind an accumulator has gone away.
#[derive(Debug, Error)]
#[error("Accumulator for {family} is closed")]
pub struct AccumulatorClosed {
    pub family: &'static str,
}

/// Producer handle for one metric family. Cheap to clone.
pub struct Accumulator<F> {
    family: &'static str,
    tx: mpsc::Sender<F>,
}

impl<F> Clone for Accumulator<F> {
    fn clone(&self) -> Self {
        Self {
            family: self.family,
            tx: self.tx.clone(),
        }
    }
}

impl<F: Send + 'static> Accumulator<F> {
    /// Handle plus raw receiver, without a consumer task.
    pub(crate) fn with_receiver(family: &'static str, capacity: usize) -> (Self, mpsc::Receiver<F>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { family, tx }, rx)
    }

    /// Start the consumer task for `recorder`.
    ///
    /// The task ends once every handle is dropped and the queue is drained;
    /// its result is the number of facts recorded.
    pub fn spawn<R>(family: &'static str, capacity: usize, recorder: R) -> (Self, JoinHandle<u64>)
    where
        R: Recorder<Fact = F>,
    {
        let (handle, rx) = Self::with_receiver(family, capacity);
        let task = tokio::spawn(consume(family, rx, recorder));
        (handle, task)
    }

    /// Queue a fact, waiting while the queue is full.
    pub async fn enqueue(&self, fact: F) -> Result<(), AccumulatorClosed> {
        self.tx
            .send(fact)
            .await
            .map_err(|_| AccumulatorClosed { family: self.family })
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Facts waiting to be recorded.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn consume<R: Recorder>(family: &'static str, mut rx: mpsc::Receiver<R::Fact>, mut recorder: R) -> u64 {
    debug!(family, "Accumulator started");
    let mut recorded: u64 = 0;
    while let Some(fact) = rx.recv().await {
        recorder.record(fact);
        recorded = recorded.saturating_add(1);
    }
    debug!(family, recorded, "Accumulator drained");
    recorded
}
