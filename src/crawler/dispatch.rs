//! Bounded-concurrency per-item dispatch.
//!
//! [`for_each_limit`] applies an async function to every item of a list with
//! at most `limit` items in flight. Items are handed out in input order;
//! completion order is unspecified. When the job's token is cancelled, no
//! further items are handed out and the function returns the counts gathered
//! so far.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{CrawlerError, ErrorKind, FailureKinds, merge_failure_kinds, sleep};

/// Counts produced by one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Items handed to the function.
    pub processed: usize,
    /// Items whose function returned `Ok`.
    pub succeeded: usize,
    /// Items whose function returned `Err`.
    pub failed: usize,
    /// Failures per kind.
    pub failure_kinds: FailureKinds,
}

impl DispatchStats {
    fn record(&mut self, outcome: Result<(), CrawlerError>) {
        self.processed += 1;
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(err) => {
                let kind = err.kind();
                debug!(kind = %kind, error = %err, "item failed");
                self.record_failure(kind);
            }
        }
    }

    fn record_failure(&mut self, kind: ErrorKind) {
        self.failed += 1;
        *self.failure_kinds.entry(kind).or_insert(0) += 1;
    }

    /// Adds another dispatch's counts into this one.
    pub fn merge(&mut self, other: &DispatchStats) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        merge_failure_kinds(&mut self.failure_kinds, &other.failure_kinds);
    }
}

/// Applies `f` to each item with at most `limit` concurrent calls.
///
/// `limit <= 1` runs the items sequentially in input order, checking the
/// token before each one. Larger limits start exactly `limit` workers that
/// pull from a shared channel fed in input order.
pub async fn for_each_limit<T, F, Fut>(
    cancel: &CancellationToken,
    items: Vec<T>,
    limit: usize,
    f: F,
) -> DispatchStats
where
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<(), CrawlerError>>,
{
    for_each_limit_paced(cancel, items, limit, Duration::ZERO, f).await
}

/// Like [`for_each_limit`], sleeping `pause` between successive items of the
/// same worker. A cancelled pause ends the worker.
#[instrument(level = "debug", skip(cancel, items, f), fields(items = items.len()))]
pub async fn for_each_limit_paced<T, F, Fut>(
    cancel: &CancellationToken,
    items: Vec<T>,
    limit: usize,
    pause: Duration,
    f: F,
) -> DispatchStats
where
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<(), CrawlerError>>,
{
    if limit <= 1 {
        return run_sequential(cancel, items, pause, &f).await;
    }

    let (job_tx, job_rx) = mpsc::channel::<T>(1);
    let job_rx = Mutex::new(job_rx);

    let feeder = async move {
        for item in items {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("dispatch cancelled, no further items handed out");
                    break;
                }
                sent = job_tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        // Dropping the sender closes the channel so idle workers exit.
    };

    let workers = join_all((0..limit).map(|_| run_worker(&job_rx, cancel, pause, &f)));
    let ((), per_worker) = tokio::join!(feeder, workers);

    let mut stats = DispatchStats::default();
    for worker_stats in &per_worker {
        stats.merge(worker_stats);
    }
    stats
}

async fn run_sequential<T, F, Fut>(
    cancel: &CancellationToken,
    items: Vec<T>,
    pause: Duration,
    f: &F,
) -> DispatchStats
where
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<(), CrawlerError>>,
{
    let mut stats = DispatchStats::default();
    for (index, item) in items.into_iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if index > 0 && !pause.is_zero() && !sleep(cancel, pause).await {
            break;
        }
        stats.record(f(cancel.clone(), item).await);
    }
    stats
}

async fn run_worker<T, F, Fut>(
    jobs: &Mutex<mpsc::Receiver<T>>,
    cancel: &CancellationToken,
    pause: Duration,
    f: &F,
) -> DispatchStats
where
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<(), CrawlerError>>,
{
    let mut stats = DispatchStats::default();
    let mut first = true;
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };
        // The channel may still hold an item handed out before the token fired.
        if cancel.is_cancelled() {
            break;
        }
        if !first && !pause.is_zero() && !sleep(cancel, pause).await {
            break;
        }
        first = false;
        stats.record(f(cancel.clone(), item).await);
    }
    stats
}
