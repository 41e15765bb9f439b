// src/pipeline/metrics.rs
//
// Engine observability. Counters for every stage, readable from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub frames_submitted: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub frames_rejected: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub verifier_batches: Arc<AtomicU64>,
    pub verifier_failures: Arc<AtomicU64>,
    pub detections_fused: Arc<AtomicU64>,
    pub tracks_confirmed: Arc<AtomicU64>,
    pub tracks_evicted: Arc<AtomicU64>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            verifier_batches: self.verifier_batches.load(Ordering::Relaxed),
            verifier_failures: self.verifier_failures.load(Ordering::Relaxed),
            detections_fused: self.detections_fused.load(Ordering::Relaxed),
            tracks_confirmed: self.tracks_confirmed.load(Ordering::Relaxed),
            tracks_evicted: self.tracks_evicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub frames_rejected: u64,
    pub detector_failures: u64,
    pub verifier_batches: u64,
    pub verifier_failures: u64,
    pub detections_fused: u64,
    pub tracks_confirmed: u64,
    pub tracks_evicted: u64,
}
