use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use typed_builder::TypedBuilder;

/// Rate used when none (or an unusable one) is configured, in transactions per second.
pub const DEFAULT_TPS: f64 = 1.0;

/// Shortest interval the scheduler will tick at.
const MIN_INTERVAL: Duration = Duration::from_nanos(1);

/// Longest interval the scheduler will tick at, roughly thirty years.
pub(crate) const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// The error a transaction reports when it fails.
///
/// Its contents are never inspected by the generator: returning `Err` only marks
/// the transaction as failed.
pub type TransactionError = Box<dyn std::error::Error + Send + Sync>;

pub type TransactionResult = Result<(), TransactionError>;

/// The user action invoked once per launched transaction.
///
/// Wraps any `Fn() -> impl Future<Output = TransactionResult>` so it can be
/// shared between the concurrently running transactions of a run.
///
/// # Example
/// ```rust
/// use loadgen::Transaction;
///
/// let tx = Transaction::new(|| async {
///     // talk to the system under test here
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Transaction(Arc<dyn Fn() -> BoxFuture<'static, TransactionResult> + Send + Sync>);

impl Transaction {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransactionResult> + Send + 'static,
    {
        Self(Arc::new(move || action().boxed()))
    }

    /// A transaction that does nothing and always passes.
    pub fn noop() -> Self {
        Self::new(pass)
    }

    pub(crate) fn call(&self) -> BoxFuture<'static, TransactionResult> {
        (self.0)()
    }
}

async fn pass() -> TransactionResult {
    Ok(())
}

impl Default for Transaction {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transaction(..)")
    }
}

/// Parameters of a load generator run.
///
/// The configuration is only read when the generator is constructed; every
/// field has a default, so an empty builder yields a generator that runs a
/// no-op transaction once per second forever.
///
/// Scalar fields can be loaded with serde, the transaction itself is always
/// supplied in code.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use loadgen::{Config, Transaction};
///
/// let config = Config::builder()
///     .tps(50.0)
///     .max_duration(Duration::from_secs(30))
///     .max_concurrency(8)
///     .transaction(Transaction::new(|| async { Ok(()) }))
///     .build();
/// assert_eq!(config.interval(), Duration::from_millis(20));
/// ```
#[derive(Clone, Debug, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transactions launched per second. Zero means [`DEFAULT_TPS`].
    #[builder(default = DEFAULT_TPS)]
    pub tps: f64,
    /// Stop once this many transactions passed or failed. Zero means no limit.
    #[builder(default)]
    pub max_transactions: u64,
    /// Stop once the run has lasted this long. Zero means no limit.
    #[builder(default)]
    pub max_duration: Duration,
    /// Upper bound on transactions in flight at once. Zero means no limit.
    #[builder(default)]
    pub max_concurrency: usize,
    /// Wait for in-flight transactions before signalling completion.
    #[builder(default)]
    pub drain_on_cancel: bool,
    /// The action to run. Defaults to a no-op that always passes.
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub transaction: Option<Transaction>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// The rate the generator will actually use.
    ///
    /// Zero, negative and non-finite rates cannot be turned into a tick interval
    /// and fall back to [`DEFAULT_TPS`].
    pub fn effective_tps(&self) -> f64 {
        if self.tps.is_finite() && self.tps > 0.0 {
            self.tps
        } else {
            DEFAULT_TPS
        }
    }

    /// Time between two transaction launches, `1s / tps`.
    ///
    /// Clamped between 1ns for huge rates and about thirty years for rates so
    /// small that `1 / tps` seconds does not fit a [`Duration`].
    pub fn interval(&self) -> Duration {
        let secs = 1.0 / self.effective_tps();
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_INTERVAL)
            .clamp(MIN_INTERVAL, MAX_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.tps, DEFAULT_TPS);
        assert_eq!(c.max_transactions, 0);
        assert_eq!(c.max_duration, Duration::ZERO);
        assert_eq!(c.max_concurrency, 0);
        assert!(!c.drain_on_cancel);
        assert!(c.transaction.is_none());
        assert_eq!(c.interval(), Duration::from_secs(1));
    }

    #[test]
    fn interval_is_inverse_of_rate() {
        let c = Config::builder().tps(4.0).build();
        assert_eq!(c.interval(), Duration::from_millis(250));

        let c = Config::builder().tps(0.5).build();
        assert_eq!(c.interval(), Duration::from_secs(2));
    }

    #[test]
    fn unusable_rates_fall_back_to_default() {
        for tps in [0.0, -3.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let c = Config::builder().tps(tps).build();
            assert_eq!(c.effective_tps(), DEFAULT_TPS, "tps = {tps}");
            assert_eq!(c.interval(), Duration::from_secs(1), "tps = {tps}");
        }
    }

    #[test]
    fn huge_rate_clamps_to_minimum_interval() {
        let c = Config::builder().tps(f64::MAX).build();
        assert_eq!(c.interval(), MIN_INTERVAL);
    }

    #[test]
    fn tiny_rate_saturates_to_maximum_interval() {
        for tps in [1e-20, 1e-12, f64::MIN_POSITIVE] {
            let c = Config::builder().tps(tps).build();
            assert_eq!(c.interval(), MAX_INTERVAL, "tps = {tps}");
        }

        // slow but representable rates are left alone
        let c = Config::builder().tps(1.0 / 1024.0).build();
        assert_eq!(c.interval(), Duration::from_secs(1024));
    }

    #[test]
    fn deserializes_with_defaults() {
        let c: Config = serde_json::from_str(r#"{"tps": 20.0, "max_transactions": 100}"#)
            .expect("valid config");
        assert_eq!(c.tps, 20.0);
        assert_eq!(c.max_transactions, 100);
        assert_eq!(c.max_concurrency, 0);
        assert_eq!(c.max_duration, Duration::ZERO);
        assert!(c.transaction.is_none());
    }

    #[test]
    fn serializes_without_transaction() {
        let c = Config::builder()
            .max_concurrency(3)
            .transaction(Transaction::noop())
            .build();
        let json = serde_json::to_value(&c).expect("serializable config");
        assert_eq!(json["max_concurrency"], 3);
        assert!(json.get("transaction").is_none());
    }

    #[tokio::test]
    async fn noop_transaction_passes() {
        assert!(Transaction::default().call().await.is_ok());
    }
}
