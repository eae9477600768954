use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A point-in-time view of a run's results.
///
/// Built by [`crate::LoadGen::summary`] from the generator's live counters. The
/// summary is plain data: derived figures such as the success ratio are computed
/// on demand, and the whole thing can be serialized for whatever sink the caller
/// wants to send it to.
///
/// # Example
/// ```rust
/// use loadgen::Summary;
/// use std::time::Duration;
///
/// let summary = Summary {
///     passed: 90,
///     failed: 10,
///     dropped: 3,
///     elapsed: Duration::from_secs(10),
/// };
/// assert_eq!(summary.total(), 100);
/// assert_eq!(summary.success_ratio(), 0.9);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: i64,
    pub failed: i64,
    /// Launches shed because the concurrency limit was reached.
    pub dropped: i64,
    pub elapsed: Duration,
}

impl Summary {
    /// Executed transactions, passed or failed. Drops are not included.
    pub fn total(&self) -> i64 {
        self.passed + self.failed
    }

    /// Fraction of executed transactions that passed, in `[0, 1]`.
    ///
    /// Zero when nothing has been executed yet.
    pub fn success_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.passed as f64 / total as f64,
        }
    }

    /// Executed transactions per second over the elapsed time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }
}
