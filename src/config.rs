// src/config.rs
//
// All tunable thresholds for the fusion and tracking stages. Every field has
// a documented default; `EngineConfig::load` reads overrides from a YAML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub filter: FilterConfig,
    pub verifier: VerifierConfig,
    pub tracker: TrackerConfig,
    pub errors: ErrorStoreConfig,
    pub events: EventBusConfig,
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: EngineConfig =
            serde_yaml::from_str(&contents).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Tuning passed to the fast detector. Low thresholds and a high detection cap
/// keep recall high; the filter and verifier prune the false positives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum confidence for the detector to report a box at all.
    pub confidence_threshold: f32,
    /// IoU threshold for the detector's internal NMS.
    pub iou_threshold: f32,
    /// Maximum boxes the detector may return per frame.
    pub max_detections: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.15,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Boxes covering less than this fraction of the frame are noise.
    pub min_area_fraction: f32,
    /// Boxes covering more than this fraction of the frame are false positives.
    pub max_area_fraction: f32,
    /// Confidence at or above this goes to the high band (auto-accept).
    pub high_confidence: f32,
    /// Confidence at or above this (but below `high_confidence`) is the mid
    /// band; everything below is low-mid and faces the strict gate.
    pub low_confidence: f32,
    /// IoU above which a lower-confidence box is suppressed as a duplicate.
    pub nms_iou: f32,
    /// Cap on surviving detections per class; `None` disables the cap.
    pub max_per_class: Option<usize>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.001,
            max_area_fraction: 0.90,
            high_confidence: 0.70,
            low_confidence: 0.40,
            nms_iou: 0.50,
            max_per_class: Some(5),
        }
    }
}

/// Verifier invocation and gating thresholds (see `FusionPolicy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Crops per `classify_batch` call.
    pub batch_size: usize,
    /// Mid band: similarity at or above this accepts with the verifier's label.
    pub mid_accept: f32,
    /// Mid band: similarity at or above this (but below `mid_accept`) accepts
    /// with the original detector label; below it the detection is dropped.
    pub mid_keep_original: f32,
    /// Low-mid band: similarity at or above this accepts; below it drops.
    pub strict_accept: f32,
    /// Confidence multiplier applied to mid-band detections kept when the
    /// verifier call fails.
    pub degraded_confidence_scale: f32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            mid_accept: 0.80,
            mid_keep_original: 0.75,
            strict_accept: 0.85,
            degraded_confidence_scale: 0.80,
        }
    }
}

/// One confirmation tier: a track whose smoothed confidence is at least
/// `min_confidence` confirms after `required_hits` matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationTier {
    pub min_confidence: f32,
    pub required_hits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU to consider a (detection, track) pair for matching.
    pub min_iou: f32,
    /// EMA factor: `smoothed = alpha * new + (1 - alpha) * old`.
    pub smoothing_alpha: f32,
    /// Milliseconds without a match before a track is evicted.
    pub max_track_age_ms: f64,
    /// Live-track cap; lowest-confidence tracks are evicted past it.
    pub max_active_tracks: usize,
    /// Capacity of the per-track label history ring.
    pub label_history: usize,
    /// Per-step recency decay for label voting; weight = decay^age.
    pub label_decay: f32,
    /// Confirmation tiers, highest `min_confidence` first. Unambiguous objects
    /// confirm fast; marginal ones need more evidence.
    pub confirmation_tiers: Vec<ConfirmationTier>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.30,
            smoothing_alpha: 0.35,
            max_track_age_ms: 1500.0,
            max_active_tracks: 12,
            label_history: 10,
            label_decay: 0.80,
            confirmation_tiers: vec![
                ConfirmationTier {
                    min_confidence: 0.75,
                    required_hits: 2,
                },
                ConfirmationTier {
                    min_confidence: 0.50,
                    required_hits: 3,
                },
                ConfirmationTier {
                    min_confidence: 0.0,
                    required_hits: 5,
                },
            ],
        }
    }
}

impl TrackerConfig {
    /// Hits required before a track at the given confidence confirms.
    pub fn required_hits(&self, confidence: f32) -> u32 {
        self.confirmation_tiers
            .iter()
            .find(|tier| confidence >= tier.min_confidence)
            .map(|tier| tier.required_hits)
            .unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorStoreConfig {
    /// Ring-buffer capacity for recent failures.
    pub capacity: usize,
}

impl Default for ErrorStoreConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Pending track events kept before the oldest is dropped.
    pub max_pending: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_pending: 64 }
    }
}
