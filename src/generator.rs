//! LoadGen: the scheduling loop that turns a rate into transactions
//!
//! A [`LoadGen`] owns everything a single run needs: the pass/fail [`Counter`]s,
//! the concurrency [`Bucket`], the tick interval derived from the configured rate
//! and the run limits. [`LoadGen::run`] drives a fixed-interval timer and launches
//! one transaction per tick on its own task, without ever waiting for it.
//!
//! # High-level flow
//! 1. `run` arms the duration watchdog (when `max_duration` is set) and starts a
//!    timer whose first tick fires one interval after start.
//! 2. On every tick a transaction task is spawned. The task:
//!    - tries to claim a permit from the bucket, and silently drops the launch if
//!      none is free,
//!    - awaits the user transaction while holding the permit,
//!    - records a pass or a fail, and requests cancellation once
//!      `passed + failed` reaches `max_transactions`.
//! 3. Cancellation can come from the caller ([`LoadGen::cancel`]), the watchdog or
//!    the transaction limit. All of them flip the same one-shot signal, extra
//!    requests are absorbed.
//! 4. The loop observes the signal, publishes completion and returns.
//!
//! # In-flight transactions
//! By default completion is signalled as soon as the loop stops: transactions
//! launched on earlier ticks keep running in the background and may still update
//! the counters afterwards. Setting [`Config::drain_on_cancel`] makes the loop wait
//! for them first, so the counters are final once [`LoadGen::done`] resolves.
//!
//! # Backpressure
//! The bucket never blocks. When `max_concurrency` transactions are already in
//! flight, the launch for the current tick is abandoned and counted in
//! [`LoadGen::dropped`] instead of being queued. A slow system under test therefore
//! lowers the achieved rate instead of growing an unbounded backlog.
//!
//! # Timing
//! Missed ticks (e.g. when the runtime is saturated) are skipped rather than fired
//! in a burst. There is no timeout on an individual transaction: one that never
//! completes holds its permit forever.
use futures::FutureExt;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    bucket::Bucket,
    config::{Config, MAX_INTERVAL, Transaction},
    counter::Counter,
    report::Summary,
};

/// What asked the run to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CancelSource {
    Caller,
    Duration,
    TransactionLimit,
}

/// A rate-driven load generator.
///
/// `LoadGen` is a cheap handle: clones share the same run, so one clone can be
/// driving [`LoadGen::run`] on a spawned task while others cancel it, wait for it
/// or read its counters.
///
/// # Example
/// ```rust
/// use loadgen::{Config, LoadGen, Transaction};
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let generator = LoadGen::new(
///     Config::builder()
///         .tps(100.0)
///         .max_transactions(25)
///         .transaction(Transaction::new(|| async { Ok(()) }))
///         .build(),
/// );
/// generator.run().await;
///
/// assert_eq!(generator.passed().value(), 25);
/// assert_eq!(generator.failed().value(), 0);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LoadGen {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    passed: Counter,
    failed: Counter,
    dropped: Counter,
    transaction: Transaction,
    tps: f64,
    interval: Duration,
    bucket: Arc<Bucket>,
    max_transactions: u64,
    max_duration: Duration,
    drain_on_cancel: bool,
    cancel: watch::Sender<bool>,
    done: watch::Sender<bool>,
    running: AtomicBool,
    started_at: OnceLock<Instant>,
    finished_at: OnceLock<Instant>,
}

impl LoadGen {
    /// Builds a generator from `config`, applying defaults for unset fields.
    pub fn new(config: Config) -> Self {
        if config.tps != 0.0 && config.effective_tps() != config.tps {
            tracing::warn!(
                tps = config.tps,
                fallback = config.effective_tps(),
                "Unusable rate configured, falling back to default"
            );
        }

        let bucket = if config.max_concurrency > 0 {
            Bucket::new(config.max_concurrency)
        } else {
            Bucket::unbounded()
        };
        let (cancel, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        let inner = Inner {
            passed: Counter::new(),
            failed: Counter::new(),
            dropped: Counter::new(),
            tps: config.effective_tps(),
            interval: config.interval(),
            bucket: Arc::new(bucket),
            max_transactions: config.max_transactions,
            max_duration: config.max_duration,
            drain_on_cancel: config.drain_on_cancel,
            transaction: config.transaction.unwrap_or_default(),
            cancel,
            done,
            running: AtomicBool::new(false),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Runs the generator until it is cancelled or hits one of its limits.
    ///
    /// Only the first call does anything: later calls, including concurrent ones,
    /// return immediately. Spawn it on its own task to keep the caller free.
    pub async fn run(&self) {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Load generator has already been started, ignoring run request");
            return;
        }

        let start = Instant::now();
        let _ = inner.started_at.set(start);
        tracing::info!(
            tps = inner.tps,
            max_transactions = inner.max_transactions,
            max_duration = ?inner.max_duration,
            max_concurrency = inner.bucket.capacity().unwrap_or(0),
            "Starting load generator"
        );

        let mut cancelled = inner.cancel.subscribe();
        let first_tick = start
            .checked_add(inner.interval)
            .or_else(|| start.checked_add(MAX_INTERVAL))
            .unwrap_or(start);
        let mut ticker = time::interval_at(first_tick, inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = if inner.max_duration.is_zero() {
            None
        } else {
            let deadline = start.checked_add(inner.max_duration);
            if deadline.is_none() {
                tracing::debug!(
                    max_duration = ?inner.max_duration,
                    "Max duration is beyond the clock's range, running without a deadline"
                );
            }
            deadline
        };
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancelled.wait_for(|c| *c) => break,
                _ = time::sleep_until(deadline.unwrap_or(start)), if deadline.is_some() => {
                    inner.request_cancel(CancelSource::Duration);
                }
                _ = ticker.tick() => {
                    in_flight.spawn(Arc::clone(inner).transaction());
                }
            }
            // reap finished transactions so the set does not grow with the run
            while in_flight.try_join_next().is_some() {}
        }

        if inner.drain_on_cancel {
            tracing::debug!(pending = in_flight.len(), "Draining in-flight transactions...");
            while let Some(res) = in_flight.join_next().await {
                if let Err(e) = res {
                    tracing::error!("Transaction task failed: {e}");
                }
            }
        } else {
            in_flight.detach_all();
        }

        let _ = inner.finished_at.set(Instant::now());
        inner.done.send_replace(true);
        tracing::info!(
            passed = inner.passed.value(),
            failed = inner.failed.value(),
            dropped = inner.dropped.value(),
            "Load generator finished"
        );
    }

    /// Asks the run to stop.
    ///
    /// Never blocks and may be called any number of times, before, during or
    /// after a run. A cancellation requested before [`LoadGen::run`] makes the run
    /// return right away.
    pub fn cancel(&self) {
        self.inner.request_cancel(CancelSource::Caller);
    }

    /// Resolves once the run has finished.
    ///
    /// The returned future does not borrow the generator and can be awaited from
    /// anywhere, by any number of waiters.
    pub fn done(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut done = self.inner.done.subscribe();
        async move {
            let _ = done.wait_for(|d| *d).await;
        }
    }

    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Transactions whose action returned `Ok`.
    pub fn passed(&self) -> &Counter {
        &self.inner.passed
    }

    /// Transactions whose action returned `Err` or panicked.
    pub fn failed(&self) -> &Counter {
        &self.inner.failed
    }

    /// Launches abandoned because every concurrency permit was taken.
    pub fn dropped(&self) -> &Counter {
        &self.inner.dropped
    }

    /// Time between two launches.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// The concurrency gate, mostly useful to observe in-flight transactions.
    pub fn bucket(&self) -> &Bucket {
        &self.inner.bucket
    }

    /// A snapshot of the counters and of how long the run has lasted so far.
    pub fn summary(&self) -> Summary {
        let inner = &self.inner;
        let elapsed = match (inner.started_at.get(), inner.finished_at.get()) {
            (Some(start), Some(end)) => end.duration_since(*start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        Summary {
            passed: inner.passed.value(),
            failed: inner.failed.value(),
            dropped: inner.dropped.value(),
            elapsed,
        }
    }
}

impl Inner {
    fn request_cancel(&self, source: CancelSource) {
        let first = self.cancel.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if first {
            tracing::debug!(?source, "Cancellation requested");
        }
    }

    async fn transaction(self: Arc<Self>) {
        let Some(_permit) = self.bucket.try_permit() else {
            self.dropped.inc();
            tracing::trace!("No concurrency permit available, dropping transaction");
            return;
        };

        let passed = match AssertUnwindSafe(self.transaction.call())
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Transaction failed");
                false
            }
            Err(_) => {
                tracing::error!("Transaction panicked, counting it as failed");
                false
            }
        };
        self.record(passed);
    }

    fn record(&self, passed: bool) {
        let total = if passed {
            self.passed.inc() + self.failed.value()
        } else {
            self.failed.inc() + self.passed.value()
        };
        let limit_reached = u64::try_from(total).is_ok_and(|t| t >= self.max_transactions);
        if self.max_transactions > 0 && limit_reached {
            self.request_cancel(CancelSource::TransactionLimit);
        }
    }
}
