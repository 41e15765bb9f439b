// src/fusion.rs
//
// Merges filter buckets and verifier scores into the frame's final detection
// list. The gating table is deterministic: band + similarity always map to
// the same accept/drop/relabel outcome.

use crate::config::VerifierConfig;
use crate::filter::ConfidenceBand;
use crate::types::{Detection, SourceTag, VerifierScore};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Keep the detection with its original label.
    Accept,
    /// Keep the detection, replacing its label with the verifier's.
    AcceptRelabeled,
    Drop,
}

pub struct FusionPolicy {
    config: VerifierConfig,
}

impl FusionPolicy {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// The gating table. High-band detections never reach the verifier, so
    /// their outcome is unconditional.
    pub fn gate(&self, band: ConfidenceBand, similarity: f32) -> GateOutcome {
        match band {
            ConfidenceBand::High => GateOutcome::Accept,
            ConfidenceBand::Mid => {
                if similarity >= self.config.mid_accept {
                    GateOutcome::AcceptRelabeled
                } else if similarity >= self.config.mid_keep_original {
                    GateOutcome::Accept
                } else {
                    GateOutcome::Drop
                }
            }
            ConfidenceBand::LowMid => {
                if similarity >= self.config.strict_accept {
                    GateOutcome::AcceptRelabeled
                } else {
                    GateOutcome::Drop
                }
            }
        }
    }

    /// Resolve verified candidates against their scores. Caller guarantees
    /// `scores[i]` belongs to `candidates[i]` (batch order is preserved).
    pub fn apply(
        &self,
        candidates: Vec<(Detection, ConfidenceBand)>,
        scores: &[VerifierScore],
    ) -> Vec<Detection> {
        candidates
            .into_iter()
            .zip(scores.iter())
            .filter_map(|((mut det, band), score)| match self.gate(band, score.similarity) {
                GateOutcome::Accept => {
                    det.source = SourceTag::Verified;
                    Some(det)
                }
                GateOutcome::AcceptRelabeled => {
                    debug!(
                        "Relabeling '{}' -> '{}' (similarity {:.2})",
                        det.label, score.label, score.similarity
                    );
                    det.label = score.label.clone();
                    det.source = SourceTag::Verified;
                    Some(det)
                }
                GateOutcome::Drop => None,
            })
            .collect()
    }

    /// Fallback when the verifier call failed: mid-band detections survive at
    /// reduced confidence (favor availability), low-mid are dropped (favor
    /// precision).
    pub fn apply_degraded(&self, candidates: Vec<(Detection, ConfidenceBand)>) -> Vec<Detection> {
        candidates
            .into_iter()
            .filter_map(|(mut det, band)| match band {
                ConfidenceBand::Mid => {
                    det.confidence *= self.config.degraded_confidence_scale;
                    Some(det)
                }
                ConfidenceBand::LowMid => None,
                ConfidenceBand::High => Some(det),
            })
            .collect()
    }

    /// Final per-frame list: auto-accepted detections followed by the
    /// verifier-resolved ones.
    pub fn fuse(&self, auto_accept: Vec<Detection>, resolved: Vec<Detection>) -> Vec<Detection> {
        let mut fused = auto_accept;
        fused.extend(resolved);
        fused
    }
}
