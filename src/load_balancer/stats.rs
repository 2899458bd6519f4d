//! Transaction-duration statistics.
//!
//! # Responsibilities
//! - Accumulate count, cumulative, minimum and maximum transaction time
//! - Keep the read-modify-write sequence off the request path
//! - Serve lock-free reads to the control surface
//!
//! # Design Decisions
//! - One recorder task per accumulator is the only writer
//! - Updates travel over a bounded channel; a full buffer applies backpressure
//! - Reset travels over the same channel, so it is ordered with the updates it clears
//! - Readers see updates eventually, not immediately

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::SchedulerError;

/// Default depth of the update buffer in front of each recorder task.
pub const DEFAULT_STATS_BUFFER: usize = 1000;

enum StatsCommand {
    Record(Duration),
    Reset(oneshot::Sender<()>),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Raw accumulator fields, written only by the recorder task.
#[derive(Debug, Default)]
struct Counters {
    count: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let count = self.count.load(Ordering::Relaxed);

        let total = self.total_nanos.load(Ordering::Relaxed);
        self.total_nanos.store(total.saturating_add(nanos), Ordering::Relaxed);

        // First sample initializes both ends of the range
        let min = self.min_nanos.load(Ordering::Relaxed);
        if count == 0 || nanos < min {
            self.min_nanos.store(nanos, Ordering::Relaxed);
        }
        let max = self.max_nanos.load(Ordering::Relaxed);
        if count == 0 || nanos > max {
            self.max_nanos.store(nanos, Ordering::Relaxed);
        }

        self.count.store(count + 1, Ordering::Release);
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Release);
        self.total_nanos.store(0, Ordering::Relaxed);
        self.min_nanos.store(0, Ordering::Relaxed);
        self.max_nanos.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of an accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl StatsSnapshot {
    /// Cumulative time divided by count, truncated; zero when nothing was recorded.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Handle to a statistics accumulator and its recorder task.
///
/// Clones share the same accumulator. The recorder task exits once every
/// handle has been dropped or [`TransactionStats::close`] has been called.
#[derive(Debug, Clone)]
pub struct TransactionStats {
    tx: mpsc::Sender<StatsCommand>,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
}

impl TransactionStats {
    /// Spawn a recorder task with an update buffer of `buffer` entries.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let counters = Arc::new(Counters::default());
        tokio::spawn(run_recorder(rx, counters.clone()));
        Self {
            tx,
            counters,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record one completed transaction.
    ///
    /// Waits only for buffer space, never for the update to be applied.
    pub async fn update_time(&self, duration: Duration) -> Result<(), SchedulerError> {
        self.submit(StatsCommand::Record(duration)).await
    }

    /// Zero the accumulator. Resolves once the reset has been applied.
    pub async fn reset(&self) -> Result<(), SchedulerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(StatsCommand::Reset(ack_tx)).await?;
        ack_rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Wait until every update submitted before this call has been applied.
    pub async fn flush(&self) -> Result<(), SchedulerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(StatsCommand::Flush(ack_tx)).await?;
        ack_rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Stop accepting updates. Already-buffered updates are still applied.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(StatsCommand::Close).await;
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn submit(&self, command: StatsCommand) -> Result<(), SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        self.tx.send(command).await.map_err(|_| SchedulerError::Closed)
    }

    /// Number of transactions recorded.
    pub fn transaction_count(&self) -> u64 {
        self.counters.count.load(Ordering::Acquire)
    }

    /// Cumulative time of all recorded transactions.
    pub fn transaction_time(&self) -> Duration {
        Duration::from_nanos(self.counters.total_nanos.load(Ordering::Relaxed))
    }

    pub fn average_transaction_time(&self) -> Duration {
        self.snapshot().average()
    }

    /// Minimum and maximum transaction time; both zero before the first sample.
    pub fn transaction_time_range(&self) -> (Duration, Duration) {
        (
            Duration::from_nanos(self.counters.min_nanos.load(Ordering::Relaxed)),
            Duration::from_nanos(self.counters.max_nanos.load(Ordering::Relaxed)),
        )
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let count = self.transaction_count();
        let (min, max) = self.transaction_time_range();
        StatsSnapshot {
            count,
            total: self.transaction_time(),
            min,
            max,
        }
    }
}

async fn run_recorder(mut rx: mpsc::Receiver<StatsCommand>, counters: Arc<Counters>) {
    while let Some(command) = rx.recv().await {
        match command {
            StatsCommand::Record(duration) => counters.record(duration),
            StatsCommand::Reset(ack) => {
                counters.reset();
                let _ = ack.send(());
            }
            StatsCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            StatsCommand::Close => rx.close(),
        }
    }
    tracing::trace!("Stats recorder stopped");
}
