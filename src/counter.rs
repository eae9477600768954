use std::sync::atomic::{AtomicI64, Ordering};

/// A lock-free monotonic counter.
///
/// Transactions running on different tasks record their outcome through a
/// `Counter`, and readers can sample it at any time. Every operation is a single
/// sequentially-consistent atomic access on one word, so a read observes all
/// increments that completed before it.
///
/// The same operations are available on an absent counter through
/// [`OptionalCounter`], which reports `0` and ignores writes.
///
/// # Example
/// ```rust
/// use loadgen::Counter;
///
/// let counter = Counter::new();
/// assert_eq!(counter.inc(), 1);
/// assert_eq!(counter.inc(), 2);
/// counter.reset();
/// assert_eq!(counter.value(), 0);
/// ```
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Increments the counter by one and returns the updated value.
    pub fn inc(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }
}

/// Counter operations on a counter that may not exist.
///
/// Lets callers hold an `Option<&Counter>` and use it without branching on
/// every access: a missing counter reads as `0` and increments are dropped.
pub trait OptionalCounter {
    fn inc(&self) -> i64;
    fn value(&self) -> i64;
    fn reset(&self);
}

impl OptionalCounter for Option<&Counter> {
    fn inc(&self) -> i64 {
        self.map_or(0, Counter::inc)
    }

    fn value(&self) -> i64 {
        self.map_or(0, Counter::value)
    }

    fn reset(&self) {
        if let Some(counter) = self {
            counter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn inc_returns_the_new_value() {
        let c = Counter::new();
        for expected in 1..=5 {
            assert_eq!(c.inc(), expected);
        }
        assert_eq!(c.value(), 5);
    }

    #[test]
    fn reset_zeroes_any_value() {
        let c = Counter::default();
        (0..42).for_each(|_| {
            c.inc();
        });
        c.reset();
        assert_eq!(c.value(), 0);
        assert_eq!(c.inc(), 1);
    }

    #[test]
    fn absent_counter_is_inert() {
        let none: Option<&Counter> = None;
        assert_eq!(none.inc(), 0);
        assert_eq!(none.inc(), 0);
        assert_eq!(none.value(), 0);
        none.reset();
        assert_eq!(none.value(), 0);
    }

    #[test]
    fn present_optional_counter_forwards() {
        let c = Counter::new();
        let some = Some(&c);
        assert_eq!(some.inc(), 1);
        assert_eq!(some.value(), 1);
        some.reset();
        assert_eq!(c.value(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let tasks = 16;
        let per_task = 1_000;
        let c = Arc::new(Counter::new());

        let handles: Vec<_> = (0..tasks)
            .map(|_| {
                let c = Arc::clone(&c);
                tokio::spawn(async move {
                    for _ in 0..per_task {
                        c.inc();
                    }
                })
            })
            .collect();
        for h in futures::future::join_all(handles).await {
            h.expect("increment task panicked");
        }

        assert_eq!(c.value(), tasks * per_task);
    }
}
