//! Call counters and cumulative timings for a logical database.

use crate::models::ClusterId;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counts and total time of queries, statements and transactions.
///
/// Every field is updated independently; a snapshot taken under load may pair a count
/// with a time that already includes the next sample.
#[derive(Debug, Default)]
pub struct Metrics {
    query_count: AtomicU64,
    query_nanos: AtomicU64,
    exec_count: AtomicU64,
    exec_nanos: AtomicU64,
    transaction_count: AtomicU64,
    transaction_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub query_count: u64,
    pub query_time: Duration,
    pub exec_count: u64,
    pub exec_time: Duration,
    pub transaction_count: u64,
    pub transaction_time: Duration,
}

fn record(count: &AtomicU64, nanos: &AtomicU64, started: Instant) {
    let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    count.fetch_add(1, Ordering::Relaxed);
    nanos.fetch_add(elapsed, Ordering::Relaxed);
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing one call.
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    pub fn end_query(&self, started: Instant) {
        record(&self.query_count, &self.query_nanos, started);
    }

    pub fn end_exec(&self, started: Instant) {
        record(&self.exec_count, &self.exec_nanos, started);
    }

    pub fn end_transaction(&self, started: Instant) {
        record(&self.transaction_count, &self.transaction_nanos, started);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            query_count: self.query_count.load(Ordering::Relaxed),
            query_time: Duration::from_nanos(self.query_nanos.load(Ordering::Relaxed)),
            exec_count: self.exec_count.load(Ordering::Relaxed),
            exec_time: Duration::from_nanos(self.exec_nanos.load(Ordering::Relaxed)),
            transaction_count: self.transaction_count.load(Ordering::Relaxed),
            transaction_time: Duration::from_nanos(
                self.transaction_nanos.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Receives periodic metrics snapshots.
pub trait Auditor: Send + Sync {
    fn audit(&self, cluster_id: ClusterId, snapshot: &MetricsSnapshot);
}

impl<F> Auditor for F
where
    F: Fn(ClusterId, &MetricsSnapshot) + Send + Sync,
{
    fn audit(&self, cluster_id: ClusterId, snapshot: &MetricsSnapshot) {
        self(cluster_id, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(Metrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_each_end_counts_once() {
        let metrics = Metrics::new();
        let started = metrics.start();
        std::thread::sleep(Duration::from_millis(2));
        metrics.end_query(started);
        metrics.end_query(metrics.start());
        metrics.end_exec(metrics.start());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.query_count, 2);
        assert!(snapshot.query_time >= Duration::from_millis(2));
        assert_eq!(snapshot.exec_count, 1);
        assert_eq!(snapshot.transaction_count, 0);
        assert_eq!(snapshot.transaction_time, Duration::ZERO);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.end_transaction(metrics.start());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().transaction_count, 8000);
    }

    #[test]
    fn test_closure_auditor() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let auditor = move |id: ClusterId, snapshot: &MetricsSnapshot| {
            sink.store(u64::from(id.0) + snapshot.exec_count, Ordering::SeqCst);
        };
        let snapshot = MetricsSnapshot {
            exec_count: 3,
            ..Default::default()
        };
        auditor.audit(ClusterId(4), &snapshot);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
