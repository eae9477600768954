use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// A bounded pool of concurrency permits with non-blocking acquire and release.
///
/// The bucket never queues: [`Bucket::acquire`] either claims a permit right away
/// or reports that the pool is exhausted. Callers that lose the race simply skip
/// their work instead of waiting for capacity, which turns overload into shed
/// load rather than an ever growing backlog. There is no fairness between
/// concurrent acquirers.
///
/// An unbounded bucket (see [`Bucket::unbounded`]) hands out permits forever and
/// tracks nothing.
///
/// # Implementation notes
/// The number of outstanding permits lives in a single [`AtomicUsize`]. Acquire is
/// a CAS loop that increments only while the count is below capacity, release is a
/// CAS loop that decrements only while the count is above zero. No locks are held
/// at any point.
#[derive(Debug)]
pub struct Bucket {
    capacity: Option<usize>,
    in_flight: AtomicUsize,
}

impl Bucket {
    /// Creates a bucket holding `size` permits.
    ///
    /// A bucket of size zero holds no permits at all and denies every acquire.
    /// Use [`Bucket::unbounded`] for a pool without a limit.
    pub fn new(size: usize) -> Self {
        Self {
            capacity: Some(size),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The configured number of permits, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_unbounded(&self) -> bool {
        self.capacity.is_none()
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of permits that could still be acquired, `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.capacity.map(|cap| cap.saturating_sub(self.in_flight()))
    }

    /// Tries to claim one permit without waiting.
    ///
    /// Returns `true` when a permit was claimed, in which case it must be handed
    /// back with exactly one call to [`Bucket::release`]. An unbounded bucket
    /// always returns `true` and holds nothing.
    pub fn acquire(&self) -> bool {
        let Some(capacity) = self.capacity else {
            return true;
        };
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < capacity).then_some(held + 1)
            })
            .is_ok()
    }

    /// Returns one permit to the pool.
    ///
    /// Releasing with no permit outstanding, or on an unbounded bucket, does
    /// nothing.
    pub fn release(&self) {
        if self.capacity.is_none() {
            return;
        }
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            });
    }

    /// Tries to claim a permit that is released automatically when dropped.
    ///
    /// This is the owned counterpart of [`Bucket::acquire`]: the returned guard
    /// keeps the bucket alive and can be moved into a spawned task, so the permit
    /// goes back to the pool however that task ends.
    pub fn try_permit(self: &Arc<Self>) -> Option<BucketPermit> {
        self.acquire().then(|| BucketPermit {
            bucket: Arc::clone(self),
        })
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// A permit claimed from a [`Bucket`], released on drop.
#[must_use = "dropping the permit releases it immediately"]
#[derive(Debug)]
pub struct BucketPermit {
    bucket: Arc<Bucket>,
}

impl Drop for BucketPermit {
    fn drop(&mut self) {
        self.bucket.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_stops_at_capacity() {
        let b = Bucket::new(3);
        assert!(b.acquire());
        assert!(b.acquire());
        assert!(b.acquire());
        assert!(!b.acquire());
        assert_eq!(b.in_flight(), 3);
        assert_eq!(b.available(), Some(0));
    }

    #[test]
    fn balanced_release_restores_availability() {
        let b = Bucket::new(2);
        let before = b.available();
        assert!(b.acquire());
        assert!(b.acquire());
        b.release();
        b.release();
        assert_eq!(b.available(), before);
        assert!(b.acquire());
    }

    #[test]
    fn release_without_acquire_is_a_no_op() {
        let b = Bucket::new(1);
        b.release();
        b.release();
        assert_eq!(b.in_flight(), 0);
        assert!(b.acquire());
        // still only one permit, the stray releases did not add capacity
        assert!(!b.acquire());
    }

    #[test]
    fn unbounded_always_acquires() {
        let b = Bucket::unbounded();
        assert!(b.is_unbounded());
        for _ in 0..10_000 {
            assert!(b.acquire());
        }
        b.release();
        assert_eq!(b.in_flight(), 0);
        assert_eq!(b.available(), None);
        assert_eq!(b.capacity(), None);
    }

    #[test]
    fn zero_size_denies_every_acquire() {
        let b = Arc::new(Bucket::new(0));
        assert!(!b.is_unbounded());
        assert_eq!(b.capacity(), Some(0));
        assert!(!b.acquire());
        assert!(b.try_permit().is_none());
        b.release();
        assert_eq!(b.in_flight(), 0);
        assert_eq!(b.available(), Some(0));
    }

    #[test]
    fn default_is_unbounded() {
        assert!(Bucket::default().is_unbounded());
    }

    #[test]
    fn permit_releases_on_drop() {
        let b = Arc::new(Bucket::new(1));
        let permit = b.try_permit();
        assert!(permit.is_some());
        assert!(b.try_permit().is_none());
        drop(permit);
        assert_eq!(b.in_flight(), 0);
        assert!(b.try_permit().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_never_exceed_capacity() {
        let capacity = 4;
        let b = Arc::new(Bucket::new(capacity));
        // counted by the holders themselves, independently of the bucket's state
        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let b = Arc::clone(&b);
                let holders = Arc::clone(&holders);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    for _ in 0..200 {
                        if let Some(permit) = b.try_permit() {
                            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            holders.fetch_sub(1, Ordering::SeqCst);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();
        for h in futures::future::join_all(handles).await {
            h.expect("acquire task panicked");
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= capacity, "{peak} holders with {capacity} permits");
        assert!(peak > 0);
        assert_eq!(holders.load(Ordering::SeqCst), 0);
        assert_eq!(b.in_flight(), 0);
    }
}
