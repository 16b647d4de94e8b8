//! Client counters for observing retry and reconnect behaviour.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Request attempts sent on the wire
    pub requests_total: AtomicU64,
    /// Attempts retried by a policy
    pub retries_total: AtomicU64,
    /// Session reconnects
    pub reconnects_total: AtomicU64,
    /// Connection errors counted against the budget
    pub connection_errors_total: AtomicU64,
    /// Failures caught by stream consumers
    pub stream_errors_total: AtomicU64,
    /// Records delivered by stream consumers
    pub records_total: AtomicU64,
    /// Keep-alive lines seen by stream consumers
    pub keepalives_total: AtomicU64,
}

impl ClientMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnects(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_errors(&self) {
        self.connection_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stream_errors(&self) {
        self.stream_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records(&self) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_keepalives(&self) {
        self.keepalives_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            connection_errors_total: self.connection_errors_total.load(Ordering::Relaxed),
            stream_errors_total: self.stream_errors_total.load(Ordering::Relaxed),
            records_total: self.records_total.load(Ordering::Relaxed),
            keepalives_total: self.keepalives_total.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub retries_total: u64,
    pub reconnects_total: u64,
    pub connection_errors_total: u64,
    pub stream_errors_total: u64,
    pub records_total: u64,
    pub keepalives_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ClientMetrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_retries();
        metrics.inc_reconnects();
        metrics.inc_connection_errors();
        metrics.inc_stream_errors();
        metrics.inc_records();
        metrics.inc_keepalives();

        let s = metrics.snapshot();
        assert_eq!(s.requests_total, 2);
        assert_eq!(s.retries_total, 1);
        assert_eq!(s.reconnects_total, 1);
        assert_eq!(s.connection_errors_total, 1);
        assert_eq!(s.stream_errors_total, 1);
        assert_eq!(s.records_total, 1);
        assert_eq!(s.keepalives_total, 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = ClientMetrics::new();
        metrics.inc_records();

        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"records_total\":1"));
        assert!(json.contains("\"retries_total\":0"));
    }
}
