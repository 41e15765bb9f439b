// src/engine.rs
//
// The single owner of all mutable tracking state. One detection cycle runs
// per admitted frame: detect -> filter -> verify (batched) -> fuse -> track.
// Stage failures are recorded and the next frame is a fresh attempt; nothing
// here aborts the pipeline.

use crate::config::EngineConfig;
use crate::errors::{ErrorRecord, ErrorStore, InferenceError};
use crate::filter::{ConfidenceBand, DetectionFilter};
use crate::fusion::FusionPolicy;
use crate::pipeline::{EngineMetrics, EventBus, FrameGate, MetricsSummary, TrackEvent};
use crate::services::{extract_crop, ObjectDetector, ObjectVerifier};
use crate::tracking::TrackStore;
use crate::types::{Crop, Detection, Frame, TrackSnapshot};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Result of handing a frame to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A detection cycle was started for this frame.
    Admitted,
    /// A cycle was already in flight; the frame was discarded with no
    /// side effects.
    Dropped,
}

/// Stage counts for one completed cycle, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default)]
struct FrameOutcome {
    raw: usize,
    auto_accepted: usize,
    verification_candidates: usize,
    fused: usize,
    live_tracks: usize,
    published: usize,
}

struct EngineState {
    store: TrackStore,
    errors: ErrorStore,
    events: EventBus,
    vocabulary: Vec<String>,
}

struct EngineInner {
    config: EngineConfig,
    detector: Arc<dyn ObjectDetector>,
    verifier: Arc<dyn ObjectVerifier>,
    filter: DetectionFilter,
    fusion: FusionPolicy,
    gate: FrameGate,
    state: Mutex<EngineState>,
    published: RwLock<Vec<TrackSnapshot>>,
    metrics: EngineMetrics,
}

/// Handle to the engine. Cheap to clone; all clones share one state owner.
#[derive(Clone)]
pub struct SceneTracker {
    inner: Arc<EngineInner>,
}

impl SceneTracker {
    pub fn new(
        config: EngineConfig,
        detector: Arc<dyn ObjectDetector>,
        verifier: Arc<dyn ObjectVerifier>,
    ) -> Self {
        let inner = EngineInner {
            filter: DetectionFilter::new(config.filter.clone()),
            fusion: FusionPolicy::new(config.verifier.clone()),
            gate: FrameGate::new(),
            state: Mutex::new(EngineState {
                store: TrackStore::new(config.tracker.clone()),
                errors: ErrorStore::new(config.errors.capacity),
                events: EventBus::new(config.events.max_pending),
                vocabulary: Vec::new(),
            }),
            published: RwLock::new(Vec::new()),
            metrics: EngineMetrics::new(),
            detector,
            verifier,
            config,
        };
        info!("Scene tracker ready");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Non-blocking frame submission. Must be called from within a Tokio
    /// runtime; the cycle runs on a spawned task. Drop-if-busy: at most one
    /// cycle is ever in flight.
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        self.inner.metrics.inc(&self.inner.metrics.frames_submitted);
        if !self.inner.gate.try_admit() {
            self.inner.metrics.inc(&self.inner.metrics.frames_dropped);
            return SubmitOutcome::Dropped;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_admitted(frame).await;
        });
        SubmitOutcome::Admitted
    }

    /// Like `submit`, but runs the admitted cycle to completion before
    /// returning. Useful for offline replay and deterministic tests.
    pub async fn ingest(&self, frame: Frame) -> SubmitOutcome {
        self.inner.metrics.inc(&self.inner.metrics.frames_submitted);
        if !self.inner.gate.try_admit() {
            self.inner.metrics.inc(&self.inner.metrics.frames_dropped);
            return SubmitOutcome::Dropped;
        }
        self.inner.run_admitted(frame).await;
        SubmitOutcome::Admitted
    }

    /// Whether a detection cycle is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Current confirmed tracks as detached snapshots, safe to read from
    /// any context.
    pub fn published_tracks(&self) -> Vec<TrackSnapshot> {
        read_lock(&self.inner.published).clone()
    }

    /// Most recent failure, for user-facing messaging.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.inner.lock_state().errors.last_error()
    }

    /// Full error ring-buffer contents, for diagnostics.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.inner.lock_state().errors.recent()
    }

    /// Pending lifecycle events, oldest first. Draining is the consumer's
    /// acknowledgement; events do not repeat.
    pub fn drain_events(&self) -> Vec<TrackEvent> {
        self.inner.lock_state().events.drain()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.inner.metrics.summary()
    }

    /// Install the active label set. Detections outside it are discarded and
    /// it doubles as the verifier's candidate list. An empty vocabulary
    /// admits everything.
    pub fn set_vocabulary(&self, labels: Vec<String>) {
        info!("Vocabulary updated: {} labels", labels.len());
        self.inner.lock_state().vocabulary = labels;
    }

    pub fn vocabulary(&self) -> Vec<String> {
        self.inner.lock_state().vocabulary.clone()
    }

    /// Forget all tracks and pending events, e.g. on a scene change. The
    /// vocabulary is kept; use `set_vocabulary` to swap it.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        state.store.reset();
        state.events.clear();
        drop(state);
        write_lock(&self.inner.published).clear();
        info!("Tracker state reset");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn record_error(&self, timestamp_ms: f64, error: &InferenceError) {
        self.lock_state().errors.record(timestamp_ms, error);
    }

    async fn run_admitted(&self, frame: Frame) {
        self.run_cycle(frame).await;
        self.gate.release();
    }

    async fn run_cycle(&self, frame: Frame) {
        let now_ms = frame.timestamp_ms;
        let mut outcome = FrameOutcome::default();

        if !frame.is_well_formed() {
            let error = InferenceError::InvalidInput(format!(
                "frame buffer {} bytes does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ));
            warn!("Rejected frame at {:.0}ms: {}", now_ms, error);
            self.metrics.inc(&self.metrics.frames_rejected);
            self.record_error(now_ms, &error);
            return;
        }

        // 1. fast detector
        let raw = match self.detector.infer(&frame, &self.config.detector).await {
            Ok(detections) => detections,
            Err(error) => {
                warn!("Detector failed at {:.0}ms: {}", now_ms, error);
                self.metrics.inc(&self.metrics.detector_failures);
                self.record_error(now_ms, &error);
                // skip fusion and tracking for this frame; tracks age normally
                return;
            }
        };
        outcome.raw = raw.len();

        // 2. vocabulary gate + heuristic filter
        let vocabulary = self.lock_state().vocabulary.clone();
        let in_vocabulary: Vec<Detection> = if vocabulary.is_empty() {
            raw
        } else {
            raw.into_iter()
                .filter(|det| vocabulary.iter().any(|label| *label == det.label))
                .collect()
        };

        let filtered = self.filter.filter(in_vocabulary);
        outcome.auto_accepted = filtered.auto_accept.len();

        // 3. selective verification of the ambiguous bands
        let mut candidates: Vec<(Detection, ConfidenceBand)> = Vec::new();
        for det in filtered.needs_verification {
            candidates.push((det, ConfidenceBand::Mid));
        }
        for det in filtered.requires_strict_gate {
            candidates.push((det, ConfidenceBand::LowMid));
        }
        outcome.verification_candidates = candidates.len();

        let resolved = if candidates.is_empty() {
            Vec::new()
        } else {
            self.verify_candidates(&frame, candidates, &vocabulary, now_ms)
                .await
        };

        // 4. fusion
        let fused = self.fusion.fuse(filtered.auto_accept, resolved);
        outcome.fused = fused.len();
        self.metrics.add(&self.metrics.detections_fused, fused.len() as u64);

        // 5. tracking update + publication
        {
            let mut state = self.lock_state();
            let events = state.store.observe(&fused, now_ms);
            for event in &events {
                match event {
                    TrackEvent::Confirmed(_) => self.metrics.inc(&self.metrics.tracks_confirmed),
                    TrackEvent::Evicted { .. } => self.metrics.inc(&self.metrics.tracks_evicted),
                    TrackEvent::LabelChanged { .. } => {}
                }
            }
            state.events.publish_all(events);

            let snapshots = state.store.confirmed_snapshots();
            outcome.live_tracks = state.store.len();
            outcome.published = snapshots.len();
            drop(state);
            *write_lock(&self.published) = snapshots;
        }

        self.metrics.inc(&self.metrics.frames_processed);
        debug!("Frame at {:.0}ms: {:?}", now_ms, outcome);
    }

    /// Run the verifier over the candidates in fixed-size batches. Each batch
    /// is awaited as a unit and its scores applied in order; a failed batch
    /// degrades per the fusion policy instead of failing the frame.
    async fn verify_candidates(
        &self,
        frame: &Frame,
        candidates: Vec<(Detection, ConfidenceBand)>,
        vocabulary: &[String],
        now_ms: f64,
    ) -> Vec<Detection> {
        let mut croppable: Vec<(Detection, ConfidenceBand, Crop)> = Vec::new();
        for (det, band) in candidates {
            match extract_crop(frame, &det.bbox, det.ephemeral_id) {
                Some(crop) => croppable.push((det, band, crop)),
                None => debug!(
                    "Dropping '{}': box yields no croppable pixels",
                    det.label
                ),
            }
        }

        let batch_size = self.config.verifier.batch_size.max(1);
        let mut resolved = Vec::new();

        let mut remaining = croppable;
        while !remaining.is_empty() {
            let tail = remaining.split_off(batch_size.min(remaining.len()));
            let batch = std::mem::replace(&mut remaining, tail);

            let crops: Vec<Crop> = batch.iter().map(|(_, _, crop)| crop.clone()).collect();
            let batch_candidates: Vec<(Detection, ConfidenceBand)> = batch
                .into_iter()
                .map(|(det, band, _)| (det, band))
                .collect();

            self.metrics.inc(&self.metrics.verifier_batches);
            match self.verifier.classify_batch(&crops, vocabulary).await {
                Ok(scores) if scores.len() == crops.len() => {
                    resolved.extend(self.fusion.apply(batch_candidates, &scores));
                }
                Ok(scores) => {
                    let error = InferenceError::InferenceFailed(format!(
                        "verifier returned {} scores for {} crops",
                        scores.len(),
                        crops.len()
                    ));
                    warn!("{}", error);
                    self.metrics.inc(&self.metrics.verifier_failures);
                    self.record_error(now_ms, &error);
                    resolved.extend(self.fusion.apply_degraded(batch_candidates));
                }
                Err(error) => {
                    warn!("Verifier batch failed at {:.0}ms: {}", now_ms, error);
                    self.metrics.inc(&self.metrics.verifier_failures);
                    self.record_error(now_ms, &error);
                    resolved.extend(self.fusion.apply_degraded(batch_candidates));
                }
            }
        }

        resolved
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poison| poison.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, SourceTag, VerifierScore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;

    fn frame(timestamp_ms: f64) -> Frame {
        Frame::new(timestamp_ms, vec![0u8; 8 * 8 * 3], 8, 8)
    }

    fn det(label: &str, confidence: f32, x: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(x, 0.3, 0.2, 0.2),
            source: SourceTag::Raw,
            ephemeral_id: 0,
        }
    }

    /// Detector that replays a fixed per-frame script.
    struct ScriptedDetector {
        script: Mutex<VecDeque<Result<Vec<Detection>, InferenceError>>>,
        calls: AtomicU64,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<Vec<Detection>, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
            })
        }

        fn repeating(detections: Vec<Detection>, frames: usize) -> Arc<Self> {
            Self::new((0..frames).map(|_| Ok(detections.clone())).collect())
        }
    }

    #[async_trait]
    impl ObjectDetector for ScriptedDetector {
        async fn infer(
            &self,
            _frame: &Frame,
            _config: &crate::config::DetectorConfig,
        ) -> Result<Vec<Detection>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Detector that parks inside `infer` until released.
    struct BlockingDetector {
        entered: Notify,
        release: Notify,
        calls: AtomicU64,
    }

    impl BlockingDetector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Notify::new(),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ObjectDetector for BlockingDetector {
        async fn infer(
            &self,
            _frame: &Frame,
            _config: &crate::config::DetectorConfig,
        ) -> Result<Vec<Detection>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    /// Verifier that answers every crop with one fixed score, or fails.
    struct FixedVerifier {
        response: Result<VerifierScore, InferenceError>,
    }

    impl FixedVerifier {
        fn scoring(label: &str, similarity: f32) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(VerifierScore {
                    label: label.to_string(),
                    similarity,
                }),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(InferenceError::ModelUnavailable),
            })
        }
    }

    #[async_trait]
    impl ObjectVerifier for FixedVerifier {
        async fn classify_batch(
            &self,
            crops: &[Crop],
            _candidate_labels: &[String],
        ) -> Result<Vec<VerifierScore>, InferenceError> {
            match &self.response {
                Ok(score) => Ok(vec![score.clone(); crops.len()]),
                Err(error) => Err(error.clone()),
            }
        }
    }

    fn engine(
        detector: Arc<dyn ObjectDetector>,
        verifier: Arc<dyn ObjectVerifier>,
    ) -> SceneTracker {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("scene_tracker=debug")
            .try_init();
        SceneTracker::new(EngineConfig::default(), detector, verifier)
    }

    #[tokio::test]
    async fn test_throttle_single_detector_invocation() {
        let detector = BlockingDetector::new();
        let tracker = engine(detector.clone(), FixedVerifier::scoring("x", 0.9));

        assert_eq!(tracker.submit(frame(0.0)), SubmitOutcome::Admitted);
        detector.entered.notified().await;

        // second frame arrives while the cycle is in flight
        assert_eq!(tracker.submit(frame(16.0)), SubmitOutcome::Dropped);

        detector.release.notify_one();
        while tracker.is_busy() {
            tokio::task::yield_now().await;
        }

        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
        let metrics = tracker.metrics();
        assert_eq!(metrics.frames_submitted, 2);
        assert_eq!(metrics.frames_dropped, 1);
        assert_eq!(metrics.frames_processed, 1);
    }

    #[tokio::test]
    async fn test_identity_stable_over_three_frames() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![det("pillow", 0.8, 0.30)]),
            Ok(vec![det("pillow", 0.8, 0.32)]),
            Ok(vec![det("pillow", 0.8, 0.34)]),
        ]);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));

        tracker.ingest(frame(0.0)).await;
        tracker.ingest(frame(33.0)).await;
        let id = tracker.published_tracks()[0].id;

        tracker.ingest(frame(66.0)).await;
        let published = tracker.published_tracks();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, id);
        assert_eq!(published[0].label, "pillow");
    }

    #[tokio::test]
    async fn test_detector_failure_surfaces_and_pipeline_survives() {
        let detector = ScriptedDetector::new(vec![
            Err(InferenceError::InferenceFailed("forced".to_string())),
            Ok(vec![det("pillow", 0.8, 0.30)]),
        ]);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));

        tracker.ingest(frame(0.0)).await;

        let last = tracker.last_error().unwrap();
        assert_eq!(last.message, "inference failed: forced");
        assert!(tracker
            .recent_errors()
            .iter()
            .any(|record| record.message == "inference failed: forced"));

        // next frame is a fresh attempt
        tracker.ingest(frame(33.0)).await;
        assert_eq!(tracker.metrics().frames_processed, 1);
        assert_eq!(tracker.metrics().detector_failures, 1);
    }

    #[tokio::test]
    async fn test_mid_band_relabeled_by_verifier() {
        let detector = ScriptedDetector::repeating(vec![det("cup", 0.55, 0.30)], 3);
        let tracker = engine(detector, FixedVerifier::scoring("mug", 0.9));

        for i in 0..3 {
            tracker.ingest(frame(i as f64 * 33.0)).await;
        }

        let published = tracker.published_tracks();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].label, "mug");
    }

    #[tokio::test]
    async fn test_verifier_failure_degrades_gracefully() {
        let detector = ScriptedDetector::new(vec![Ok(vec![
            det("cup", 0.55, 0.10),  // mid: kept at reduced confidence
            det("sock", 0.25, 0.60), // low-mid: dropped
        ])]);
        let tracker = engine(detector, FixedVerifier::failing());

        tracker.ingest(frame(0.0)).await;

        let metrics = tracker.metrics();
        assert_eq!(metrics.verifier_failures, 1);
        assert_eq!(metrics.detections_fused, 1);
        assert_eq!(
            tracker.last_error().unwrap().message,
            "model unavailable"
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_rejected() {
        let detector = ScriptedDetector::new(vec![Ok(vec![det("pillow", 0.8, 0.30)])]);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));

        let bad = Frame::new(0.0, vec![0u8; 5], 8, 8);
        tracker.ingest(bad).await;

        let metrics = tracker.metrics();
        assert_eq!(metrics.frames_rejected, 1);
        assert_eq!(metrics.frames_processed, 0);
        assert!(tracker
            .last_error()
            .unwrap()
            .message
            .starts_with("invalid input"));
    }

    #[tokio::test]
    async fn test_vocabulary_gates_detections() {
        let detector = ScriptedDetector::new(vec![Ok(vec![
            det("pillow", 0.8, 0.10),
            det("dragon", 0.9, 0.60),
        ])]);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));
        tracker.set_vocabulary(vec!["pillow".to_string(), "lamp".to_string()]);

        tracker.ingest(frame(0.0)).await;
        assert_eq!(tracker.metrics().detections_fused, 1);
    }

    #[tokio::test]
    async fn test_eviction_clears_published_and_emits_event() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![det("pillow", 0.8, 0.30)]),
            Ok(vec![det("pillow", 0.8, 0.30)]),
            Ok(Vec::new()),
        ]);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));

        tracker.ingest(frame(0.0)).await;
        tracker.ingest(frame(33.0)).await;
        assert_eq!(tracker.published_tracks().len(), 1);
        let events = tracker.drain_events();
        assert!(matches!(events[0], TrackEvent::Confirmed(_)));

        // first frame processed after the age deadline evicts the track
        tracker.ingest(frame(33.0 + 2000.0)).await;
        assert!(tracker.published_tracks().is_empty());
        let events = tracker.drain_events();
        assert!(matches!(events[0], TrackEvent::Evicted { .. }));
        assert_eq!(tracker.metrics().tracks_evicted, 1);
    }

    #[tokio::test]
    async fn test_reset_forgets_tracks() {
        let detector = ScriptedDetector::repeating(vec![det("pillow", 0.8, 0.30)], 2);
        let tracker = engine(detector, FixedVerifier::scoring("pillow", 0.9));

        tracker.ingest(frame(0.0)).await;
        tracker.ingest(frame(33.0)).await;
        assert_eq!(tracker.published_tracks().len(), 1);

        tracker.reset();
        assert!(tracker.published_tracks().is_empty());
        assert!(tracker.drain_events().is_empty());
    }
}
