// src/tracking/store.rs
//
// The set of live tracks and the per-frame update pass: greedy IoU matching,
// smoothing of matched tracks, creation of tentative tracks for unmatched
// detections, age-based eviction and the capacity limit.
//
// Greedy matching (highest IoU first, ties to the higher-confidence
// detection) instead of optimal assignment keeps the pass linear-ish in the
// pair count, which is what a frame-rate budget tolerates.

use crate::config::TrackerConfig;
use crate::pipeline::events::TrackEvent;
use crate::tracking::track::Track;
use crate::types::{Detection, TrackSnapshot};
use tracing::{debug, info};

pub struct TrackStore {
    config: TrackerConfig,
    tracks: Vec<Track>,
}

impl TrackStore {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(16),
        }
    }

    /// Fold one frame's fused detections into the store. Each detection
    /// matches at most one track and each track at most one detection.
    /// Returns the lifecycle events this frame produced.
    pub fn observe(&mut self, detections: &[Detection], now_ms: f64) -> Vec<TrackEvent> {
        let mut events = Vec::new();

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; detections.len()];

        // all pairs above the IoU floor, highest IoU first; ties go to the
        // higher-confidence detection, then to ephemeral id for determinism
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.min_iou {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    detections[b.1]
                        .confidence
                        .partial_cmp(&detections[a.1].confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then(detections[a.1].ephemeral_id.cmp(&detections[b.1].ephemeral_id))
        });

        for (ti, di, iou) in pairs {
            if matched_tracks[ti] || matched_dets[di] {
                continue;
            }
            matched_tracks[ti] = true;
            matched_dets[di] = true;

            let track = &mut self.tracks[ti];
            let update = track.update_with_detection(&detections[di], &self.config, now_ms);
            debug!(
                "Track {} matched '{}' (IoU {:.2}, hits {})",
                track.id, detections[di].label, iou, track.hit_count
            );

            if update.confirmed_now {
                events.push(TrackEvent::Confirmed(track.snapshot()));
            }
            if let Some((previous, current)) = update.label_change {
                if track.is_confirmed() {
                    events.push(TrackEvent::LabelChanged {
                        id: track.id,
                        previous,
                        current,
                    });
                }
            }
        }

        // unmatched detections seed new tentative tracks
        for (di, matched) in matched_dets.iter().enumerate() {
            if !matched {
                let track = Track::new(&detections[di], now_ms);
                debug!(
                    "New tentative track {} for '{}'",
                    track.id, detections[di].label
                );
                self.tracks.push(track);
            }
        }

        // unmatched tracks are left unsmoothed and age out past the deadline
        let max_age = self.config.max_track_age_ms;
        self.tracks.retain(|track| {
            let alive = now_ms - track.last_matched_ms <= max_age;
            if !alive {
                info!(
                    "Track {} ('{}') evicted after {:.0}ms without a match",
                    track.id,
                    track.stable_label,
                    now_ms - track.last_matched_ms
                );
                events.push(TrackEvent::Evicted {
                    id: track.id,
                    label: track.stable_label.clone(),
                });
            }
            alive
        });

        // dense scenes: shed the lowest-confidence tracks first
        while self.tracks.len() > self.config.max_active_tracks {
            let weakest = self
                .tracks
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    a.1.confidence
                        .partial_cmp(&b.1.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            let Some(index) = weakest else { break };
            let track = self.tracks.swap_remove(index);
            info!(
                "Track {} ('{}') evicted by capacity limit (confidence {:.2})",
                track.id, track.stable_label, track.confidence
            );
            events.push(TrackEvent::Evicted {
                id: track.id,
                label: track.stable_label,
            });
        }

        events
    }

    /// Immutable copies of the confirmed tracks, safe to publish.
    pub fn confirmed_snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .filter(|track| track.is_confirmed())
            .map(|track| track.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    #[cfg(test)]
    pub(crate) fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}
