//! System-wide counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub isolates_created: AtomicU64,
    pub isolates_terminated: AtomicU64,
    pub isolates_failed: AtomicU64,
    pub events_delivered: AtomicU64,
    pub handler_failures: AtomicU64,
    pub submissions: AtomicU64,
    pub batches: AtomicU64,
}

impl SystemMetrics {
    pub fn record_created(&self) {
        self.isolates_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminated(&self) {
        self.isolates_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.isolates_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, events: usize) {
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let created = self.isolates_created.load(Ordering::Relaxed);
        let terminated = self.isolates_terminated.load(Ordering::Relaxed);
        let batches = self.batches.load(Ordering::Relaxed);
        let events_delivered = self.events_delivered.load(Ordering::Relaxed);

        MetricsSnapshot {
            isolates_created: created,
            isolates_terminated: terminated,
            isolates_live: created.saturating_sub(terminated),
            isolates_failed: self.isolates_failed.load(Ordering::Relaxed),
            events_delivered,
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            batches,
            avg_events_per_batch: if batches == 0 {
                0.0
            } else {
                events_delivered as f64 / batches as f64
            },
        }
    }
}

/// Point-in-time copy of [`SystemMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub isolates_created: u64,
    pub isolates_terminated: u64,
    pub isolates_live: u64,
    pub isolates_failed: u64,
    pub events_delivered: u64,
    pub handler_failures: u64,
    pub submissions: u64,
    pub batches: u64,
    pub avg_events_per_batch: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = SystemMetrics::default();
        assert_eq!(metrics.snapshot().avg_events_per_batch, 0.0);

        metrics.record_created();
        metrics.record_created();
        metrics.record_terminated();
        metrics.record_batch();
        metrics.record_batch();
        metrics.record_delivered(6);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.isolates_live, 1);
        assert_eq!(snapshot.events_delivered, 6);
        assert_eq!(snapshot.avg_events_per_batch, 3.0);
    }
}
