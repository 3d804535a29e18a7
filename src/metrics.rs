//! Lightweight pipeline counters surfaced through the service facade.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    turns_completed: AtomicU64,
    turns_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document and the number of chunks produced for it.
    pub fn record_ingest(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record the outcome of an answer turn.
    pub fn record_turn(&self, completed: bool) {
        if completed {
            self.turns_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.turns_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents ingested since startup.
    pub documents_ingested: u64,
    /// Total chunk count produced across all ingested documents.
    pub chunks_indexed: u64,
    /// Answer turns that reached the done event.
    pub turns_completed: u64,
    /// Answer turns that failed or were cancelled mid-stream.
    pub turns_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_ingests_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_ingest(2);
        metrics.record_ingest(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn separates_completed_and_failed_turns() {
        let metrics = PipelineMetrics::new();
        metrics.record_turn(true);
        metrics.record_turn(false);
        metrics.record_turn(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.turns_completed, 2);
        assert_eq!(snapshot.turns_failed, 1);
    }
}
