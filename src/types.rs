// src/types.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned bounding box in normalized frame coordinates.
/// Origin is the top-left corner; x, y, width and height are all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Intersection-over-union with another box. Returns 0.0 for disjoint
    /// or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Whether a detection carries the raw detector output or a verifier-refined label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    Raw,
    Verified,
}

/// One per-frame, per-box observation. Created fresh every frame and consumed
/// by the tracking pass; `ephemeral_id` has no meaning across frames.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub source: SourceTag,
    pub ephemeral_id: u64,
}

/// Device orientation reported by the capture subsystem alongside each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    #[default]
    LandscapeRight,
    LandscapeLeft,
}

/// A camera frame handed to the engine. Pixel data is tightly packed RGB8,
/// row-major, `width * height * 3` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp_ms: f64,
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub orientation: Orientation,
}

impl Frame {
    pub fn new(timestamp_ms: f64, data: Vec<u8>, width: usize, height: usize) -> Self {
        Self {
            timestamp_ms,
            data,
            width,
            height,
            orientation: Orientation::default(),
        }
    }

    /// A frame is well formed when its buffer length matches its dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height * 3
    }
}

/// Refined label plus similarity score for one crop, as returned by the verifier.
#[derive(Debug, Clone)]
pub struct VerifierScore {
    pub label: String,
    pub similarity: f32,
}

/// Image region cut from the source frame for verification.
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: image::RgbImage,
    /// `ephemeral_id` of the detection this crop was taken for.
    pub detection_id: u64,
}

/// Read-only copy of a confirmed track, safe to hand to any observer.
/// Never aliases tracker-internal state.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: Uuid,
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub hit_count: u32,
    pub last_matched_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::new(0.25, 0.25, 0.5, 0.5);
        let score = a.iou(&b);
        // intersection 0.0625, union 0.4375
        assert!((score - 0.0625 / 0.4375).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
        let b = BoundingBox::new(0.5, 0.5, 0.2, 0.2);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.1, 0.1, 0.3, 0.3);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_well_formed() {
        let frame = Frame::new(0.0, vec![0u8; 4 * 4 * 3], 4, 4);
        assert!(frame.is_well_formed());

        let truncated = Frame::new(0.0, vec![0u8; 10], 4, 4);
        assert!(!truncated.is_well_formed());

        let empty = Frame::new(0.0, Vec::new(), 0, 0);
        assert!(!empty.is_well_formed());
    }
}
