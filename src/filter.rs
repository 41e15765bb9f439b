// src/filter.rs
//
// Synchronous heuristic stage between the fast detector and the expensive
// verifier: size rejection, greedy NMS, per-class caps, confidence bucketing.
// Pure — no engine state is touched, so the stage is trivially idempotent on
// its own accepted output.

use crate::config::FilterConfig;
use crate::types::Detection;
use std::collections::HashMap;
use tracing::debug;

/// Confidence band a detection falls into after bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// Trusted as-is; bypasses verification.
    High,
    /// Sent to the verifier under the normal gate.
    Mid,
    /// Sent to the verifier under the strict gate.
    LowMid,
}

/// One frame's detections partitioned by verification need.
/// Transient — lives only within a single fusion pass.
#[derive(Debug, Default)]
pub struct FilteredDetections {
    pub auto_accept: Vec<Detection>,
    pub needs_verification: Vec<Detection>,
    pub requires_strict_gate: Vec<Detection>,
}

impl FilteredDetections {
    pub fn total(&self) -> usize {
        self.auto_accept.len() + self.needs_verification.len() + self.requires_strict_gate.len()
    }
}

pub struct DetectionFilter {
    config: FilterConfig,
}

impl DetectionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn band(&self, confidence: f32) -> ConfidenceBand {
        if confidence >= self.config.high_confidence {
            ConfidenceBand::High
        } else if confidence >= self.config.low_confidence {
            ConfidenceBand::Mid
        } else {
            ConfidenceBand::LowMid
        }
    }

    /// Partition one frame's detections. Steps: reject out-of-bounds sizes,
    /// suppress spatial duplicates, cap per class, bucket by confidence.
    pub fn filter(&self, detections: Vec<Detection>) -> FilteredDetections {
        let incoming = detections.len();

        let sized: Vec<Detection> = detections
            .into_iter()
            .filter(|det| {
                let area = det.bbox.area();
                area >= self.config.min_area_fraction && area <= self.config.max_area_fraction
            })
            .collect();

        let deduped = self.nms(sized);
        let capped = self.cap_per_class(deduped);

        let mut result = FilteredDetections::default();
        for det in capped {
            match self.band(det.confidence) {
                ConfidenceBand::High => result.auto_accept.push(det),
                ConfidenceBand::Mid => result.needs_verification.push(det),
                ConfidenceBand::LowMid => result.requires_strict_gate.push(det),
            }
        }

        if result.total() < incoming {
            debug!(
                "Filter kept {}/{} detections ({} auto, {} verify, {} strict)",
                result.total(),
                incoming,
                result.auto_accept.len(),
                result.needs_verification.len(),
                result.requires_strict_gate.len()
            );
        }

        result
    }

    /// Greedy NMS by descending confidence. Ties broken by `ephemeral_id` so
    /// the suppression order is deterministic.
    fn nms(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        if detections.is_empty() {
            return detections;
        }

        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ephemeral_id.cmp(&b.ephemeral_id))
        });

        let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
        while !detections.is_empty() {
            let current = detections.remove(0);
            detections.retain(|det| current.bbox.iou(&det.bbox) <= self.config.nms_iou);
            keep.push(current);
        }
        keep
    }

    /// Keep at most `max_per_class` detections per label, preferring the
    /// higher-confidence ones (input arrives sorted from `nms`).
    fn cap_per_class(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let Some(cap) = self.config.max_per_class else {
            return detections;
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        detections
            .into_iter()
            .filter(|det| {
                let count = counts.entry(det.label.clone()).or_insert(0);
                *count += 1;
                *count <= cap
            })
            .collect()
    }
}
