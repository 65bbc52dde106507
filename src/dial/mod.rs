//! Bounded worker pool for probes.
//!
//! The [`Dialer`] caps the number of probes in flight. Callers past the cap
//! wait for a slot; nothing is rejected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::probe::{ProbeError, ProbeTarget, Prober};

/// Result of one dial: round-trip time on success, the failure otherwise.
pub type DialResult = Result<Duration, ProbeError>;

/// Concurrency-limited probe executor.
pub struct Dialer {
    slots: Arc<Semaphore>,
    capacity: usize,
    prober: Arc<dyn Prober>,
}

impl Dialer {
    /// Create a dialer with `max_connections` slots. Zero is raised to one.
    pub fn new(max_connections: usize, prober: Arc<dyn Prober>) -> Self {
        let capacity = max_connections.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            prober,
        }
    }

    /// Wait for a free slot, then run exactly one probe against `target`.
    ///
    /// The probe runs in its own task which owns the slot permit, so the slot
    /// is returned on every exit path, including a panicking prober.
    pub async fn submit(&self, target: ProbeTarget) -> DialResult {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::Worker("dialer is closed".to_string()))?;

        let prober = self.prober.clone();
        let worker = tokio::spawn(async move {
            let _permit = permit; // Hold permit until done
            prober.probe(&target).await
        });

        worker
            .await
            .map_err(|e| ProbeError::Worker(format!("probe task failed: {}", e)))?
    }

    /// Maximum number of concurrent probes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of probes currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for a while and tracks the highest number of concurrent calls.
    struct GaugeProber {
        current: AtomicUsize,
        peak: AtomicUsize,
        hold: Duration,
    }

    #[async_trait]
    impl Prober for GaugeProber {
        async fn probe(&self, target: &ProbeTarget) -> Result<Duration, ProbeError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if target.address == "down" {
                Err(ProbeError::Timeout(target.timeout))
            } else {
                Ok(Duration::from_millis(5))
            }
        }
    }

    struct PanicProber;

    #[async_trait]
    impl Prober for PanicProber {
        async fn probe(&self, _target: &ProbeTarget) -> Result<Duration, ProbeError> {
            panic!("prober blew up");
        }
    }

    fn gauge(hold: Duration) -> Arc<GaugeProber> {
        Arc::new(GaugeProber {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            hold,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity() {
        let prober = gauge(Duration::from_millis(100));
        let dialer = Arc::new(Dialer::new(3, prober.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let dialer = dialer.clone();
            let address = if i % 4 == 0 { "down" } else { "up" };
            tasks.spawn(async move {
                dialer
                    .submit(ProbeTarget::icmp(address, Duration::from_secs(1)))
                    .await
            });
        }

        let mut ok = 0;
        let mut failed = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => ok += 1,
                Err(_) => failed += 1,
            }
        }

        assert_eq!(ok, 15);
        assert_eq!(failed, 5);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 3);
        assert_eq!(dialer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_makes_callers_wait() {
        let prober = gauge(Duration::from_secs(1));
        let dialer = Arc::new(Dialer::new(1, prober));

        let first = {
            let dialer = dialer.clone();
            tokio::spawn(async move { dialer.submit(ProbeTarget::icmp("up", Duration::from_secs(2))).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(dialer.in_flight(), 1);

        let started = tokio::time::Instant::now();
        tokio_test::assert_ok!(dialer.submit(ProbeTarget::icmp("up", Duration::from_secs(2))).await);
        // Second probe had to wait for the first one to release its slot
        assert!(started.elapsed() >= Duration::from_secs(2) - Duration::from_millis(1));
        tokio_test::assert_ok!(first.await.unwrap());
    }

    #[tokio::test]
    async fn test_panicking_probe_releases_slot() {
        let dialer = Dialer::new(1, Arc::new(PanicProber));

        for _ in 0..3 {
            let result = dialer.submit(ProbeTarget::icmp("x", Duration::from_secs(1))).await;
            assert!(matches!(result, Err(ProbeError::Worker(_))));
        }
        assert_eq!(dialer.in_flight(), 0);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let dialer = Dialer::new(0, Arc::new(PanicProber));
        assert_eq!(dialer.capacity(), 1);
    }
}
