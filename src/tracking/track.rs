// src/tracking/track.rs
//
// A single identity-stable track. The id is assigned once at creation and
// never reused; everything else is smoothed or voted over time to absorb
// detector jitter.

use crate::config::TrackerConfig;
use crate::types::{BoundingBox, Detection, TrackSnapshot};
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Seen, but not yet trusted enough to publish.
    Tentative,
    /// Published to observers.
    Confirmed,
}

/// One (label, confidence) observation, most-recent-last in the history ring.
#[derive(Debug, Clone)]
pub struct LabelVote {
    pub label: String,
    pub confidence: f32,
}

/// What changed during a matched-frame update; the store turns this into
/// lifecycle events.
#[derive(Debug, Default)]
pub(crate) struct TrackUpdate {
    pub confirmed_now: bool,
    /// (previous, current) when the stable label switched.
    pub label_change: Option<(String, String)>,
}

#[derive(Debug)]
pub struct Track {
    pub id: Uuid,
    /// EMA-smoothed box and confidence.
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub stable_label: String,
    label_history: VecDeque<LabelVote>,
    pub hit_count: u32,
    pub last_matched_ms: f64,
    pub state: LifecycleState,
}

impl Track {
    pub(crate) fn new(det: &Detection, timestamp_ms: f64) -> Self {
        let mut label_history = VecDeque::new();
        label_history.push_back(LabelVote {
            label: det.label.clone(),
            confidence: det.confidence,
        });
        Self {
            id: Uuid::new_v4(),
            bbox: det.bbox,
            confidence: det.confidence,
            stable_label: det.label.clone(),
            label_history,
            hit_count: 1,
            last_matched_ms: timestamp_ms,
            state: LifecycleState::Tentative,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == LifecycleState::Confirmed
    }

    pub fn label_history(&self) -> &VecDeque<LabelVote> {
        &self.label_history
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            label: self.stable_label.clone(),
            bbox: self.bbox,
            confidence: self.confidence,
            hit_count: self.hit_count,
            last_matched_ms: self.last_matched_ms,
        }
    }

    /// Fold one matched detection into the track: EMA smoothing, label vote,
    /// hit accounting, and the tiered tentative -> confirmed transition.
    pub(crate) fn update_with_detection(
        &mut self,
        det: &Detection,
        config: &TrackerConfig,
        timestamp_ms: f64,
    ) -> TrackUpdate {
        let alpha = config.smoothing_alpha;
        self.bbox = BoundingBox::new(
            alpha * det.bbox.x + (1.0 - alpha) * self.bbox.x,
            alpha * det.bbox.y + (1.0 - alpha) * self.bbox.y,
            alpha * det.bbox.width + (1.0 - alpha) * self.bbox.width,
            alpha * det.bbox.height + (1.0 - alpha) * self.bbox.height,
        );
        self.confidence = alpha * det.confidence + (1.0 - alpha) * self.confidence;

        self.label_history.push_back(LabelVote {
            label: det.label.clone(),
            confidence: det.confidence,
        });
        while self.label_history.len() > config.label_history.max(1) {
            self.label_history.pop_front();
        }

        let label_change = self.revote_stable_label(config.label_decay);

        self.hit_count += 1;
        self.last_matched_ms = timestamp_ms;

        let mut update = TrackUpdate {
            confirmed_now: false,
            label_change,
        };

        if self.state == LifecycleState::Tentative
            && self.hit_count >= config.required_hits(self.confidence)
        {
            self.state = LifecycleState::Confirmed;
            update.confirmed_now = true;
            debug!(
                "Track {} confirmed as '{}' after {} hits",
                self.id, self.stable_label, self.hit_count
            );
        }

        update
    }

    /// Weighted majority vote over the history with exponential recency decay
    /// (weight = decay^age, age 0 for the newest vote). The incumbent label
    /// only loses when a challenger's share strictly exceeds its own, so
    /// single-frame flicker never changes the published label.
    fn revote_stable_label(&mut self, decay: f32) -> Option<(String, String)> {
        let mut shares: HashMap<&str, f32> = HashMap::new();
        for (age, vote) in self.label_history.iter().rev().enumerate() {
            *shares.entry(vote.label.as_str()).or_insert(0.0) +=
                vote.confidence * decay.powi(age as i32);
        }

        let incumbent_share = shares
            .get(self.stable_label.as_str())
            .copied()
            .unwrap_or(0.0);

        // strongest challenger; ties broken lexicographically for determinism
        let mut challenger: Option<(String, f32)> = None;
        for (label, share) in &shares {
            if *label == self.stable_label.as_str() {
                continue;
            }
            let beats_current = match &challenger {
                Some((best_label, best_share)) => {
                    *share > *best_share
                        || (*share == *best_share && *label < best_label.as_str())
                }
                None => true,
            };
            if beats_current {
                challenger = Some((label.to_string(), *share));
            }
        }

        if let Some((label, share)) = challenger {
            if share > incumbent_share {
                let previous = std::mem::replace(&mut self.stable_label, label.clone());
                debug!(
                    "Track {} label '{}' -> '{}' (share {:.2} > {:.2})",
                    self.id, previous, label, share, incumbent_share
                );
                return Some((previous, label));
            }
        }
        None
    }
}
