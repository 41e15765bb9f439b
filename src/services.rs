// src/services.rs
//
// Contracts for the two external inference services. The engine only ever
// holds trait objects, so production backends and fixed-sequence test fakes
// are interchangeable.

use crate::config::DetectorConfig;
use crate::errors::InferenceError;
use crate::types::{BoundingBox, Crop, Detection, Frame, VerifierScore};
use async_trait::async_trait;
use image::RgbImage;

/// Fast, high-recall detector. Expected to over-report; downstream stages
/// prune the false positives.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn infer(
        &self,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> Result<Vec<Detection>, InferenceError>;
}

/// Selective, expensive verifier. Takes a batch of crops plus the candidate
/// label set and returns one refined (label, similarity) per crop, in order.
#[async_trait]
pub trait ObjectVerifier: Send + Sync {
    async fn classify_batch(
        &self,
        crops: &[Crop],
        candidate_labels: &[String],
    ) -> Result<Vec<VerifierScore>, InferenceError>;
}

/// Cut the region under a normalized box out of an RGB8 frame.
/// The box is clamped to the frame; returns `None` when nothing remains.
pub fn extract_crop(frame: &Frame, bbox: &BoundingBox, detection_id: u64) -> Option<Crop> {
    let frame_w = frame.width as f32;
    let frame_h = frame.height as f32;

    let x0 = (bbox.x.max(0.0) * frame_w).floor() as usize;
    let y0 = (bbox.y.max(0.0) * frame_h).floor() as usize;
    let x1 = (((bbox.x + bbox.width).min(1.0)) * frame_w).ceil() as usize;
    let y1 = (((bbox.y + bbox.height).min(1.0)) * frame_h).ceil() as usize;

    let x1 = x1.min(frame.width);
    let y1 = y1.min(frame.height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;
    let mut pixels = vec![0u8; crop_w * crop_h * 3];

    for row in 0..crop_h {
        let src_start = ((y0 + row) * frame.width + x0) * 3;
        let dst_start = row * crop_w * 3;
        pixels[dst_start..dst_start + crop_w * 3]
            .copy_from_slice(&frame.data[src_start..src_start + crop_w * 3]);
    }

    RgbImage::from_raw(crop_w as u32, crop_h as u32, pixels).map(|image| Crop {
        image,
        detection_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: usize, height: usize) -> Frame {
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                data.push((y * width + x) as u8);
                data.push(0);
                data.push(0);
            }
        }
        Frame::new(0.0, data, width, height)
    }

    #[test]
    fn test_crop_extracts_expected_pixels() {
        let frame = gradient_frame(4, 4);
        // center 2x2 region: pixels (1,1), (2,1), (1,2), (2,2)
        let bbox = BoundingBox::new(0.25, 0.25, 0.5, 0.5);
        let crop = extract_crop(&frame, &bbox, 7).unwrap();

        assert_eq!(crop.detection_id, 7);
        assert_eq!(crop.image.dimensions(), (2, 2));
        assert_eq!(crop.image.get_pixel(0, 0).0[0], 5);
        assert_eq!(crop.image.get_pixel(1, 0).0[0], 6);
        assert_eq!(crop.image.get_pixel(0, 1).0[0], 9);
        assert_eq!(crop.image.get_pixel(1, 1).0[0], 10);
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = gradient_frame(4, 4);
        let bbox = BoundingBox::new(0.75, 0.75, 0.5, 0.5);
        let crop = extract_crop(&frame, &bbox, 0).unwrap();
        assert_eq!(crop.image.dimensions(), (1, 1));
        assert_eq!(crop.image.get_pixel(0, 0).0[0], 15);
    }

    #[test]
    fn test_degenerate_box_yields_no_crop() {
        let frame = gradient_frame(4, 4);
        let outside = BoundingBox::new(1.2, 1.2, 0.3, 0.3);
        assert!(extract_crop(&frame, &outside, 0).is_none());

        let zero = BoundingBox::new(0.5, 0.5, 0.0, 0.0);
        assert!(extract_crop(&frame, &zero, 0).is_none());
    }
}
