//! UltraFace face detector on ONNX Runtime
//!
//! Runs the "Ultra-Light-Fast-Generic-Face-Detector" 320x240 model. The model
//! emits per-anchor class scores and normalized corner boxes; we threshold,
//! suppress overlaps and convert back to source pixels.

use std::path::Path;

use image::GrayImage;
use ndarray::Array4;

use super::{DetectionCandidate, DetectionError, FaceDetector};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const PIXEL_MEAN: f32 = 127.0;
const PIXEL_SCALE: f32 = 128.0;

/// Face detector backed by an UltraFace ONNX session
pub struct UltraFaceDetector {
    session: ort::session::Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl UltraFaceDetector {
    /// Load the model at `path`
    pub fn load(path: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self, DetectionError> {
        let load_err = |message: String| DetectionError::ModelLoad {
            path: path.to_path_buf(),
            message,
        };

        let session = ort::session::Session::builder()
            .map_err(|e| load_err(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| load_err(format!("Failed to set threads: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| load_err(e.to_string()))?;

        tracing::info!("Loaded face model from {}", path.display());

        Ok(Self {
            session,
            score_threshold,
            nms_threshold,
        })
    }

    /// Resize to the model input and lay out as normalized CHW with the luma
    /// replicated into all three channels
    fn preprocess(image: &GrayImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let channel_stride = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
        let mut output = vec![0.0f32; channel_stride * 3];

        let x_ratio = width as f32 / INPUT_WIDTH as f32;
        let y_ratio = height as f32 / INPUT_HEIGHT as f32;
        let raw = image.as_raw();

        for y in 0..INPUT_HEIGHT {
            for x in 0..INPUT_WIDTH {
                let src_x = (x as f32 * x_ratio) as u32;
                let src_y = (y as f32 * y_ratio) as u32;
                let src_idx = (src_y * width + src_x) as usize;

                if let Some(&luma) = raw.get(src_idx) {
                    let value = (luma as f32 - PIXEL_MEAN) / PIXEL_SCALE;
                    let pixel_idx = (y * INPUT_WIDTH + x) as usize;
                    output[pixel_idx] = value;
                    output[channel_stride + pixel_idx] = value;
                    output[2 * channel_stride + pixel_idx] = value;
                }
            }
        }

        output
    }

    fn run(&mut self, image: &GrayImage) -> Result<Vec<(DetectionCandidate, f32)>, DetectionError> {
        let input = Self::preprocess(image);
        let input_array = Array4::from_shape_vec(
            (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
            input,
        )
        .map_err(|e| DetectionError::Inference(format!("Failed to create input array: {}", e)))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| DetectionError::Inference(format!("Failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let mut scores: Option<Vec<f32>> = None;
        let mut boxes: Option<Vec<f32>> = None;
        for (position, (name, value)) in outputs.iter().enumerate() {
            let (_shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract {}: {}", name, e)))?;
            // Exported models name the outputs; fall back to their order otherwise
            match name {
                "scores" => scores = Some(data.to_vec()),
                "boxes" => boxes = Some(data.to_vec()),
                _ if position == 0 => scores = Some(data.to_vec()),
                _ => boxes = Some(data.to_vec()),
            }
        }

        let (Some(scores), Some(boxes)) = (scores, boxes) else {
            return Err(DetectionError::Inference("model returned fewer than two outputs".to_string()));
        };

        let (width, height) = image.dimensions();
        let raw = decode_candidates(&scores, &boxes, self.score_threshold, width as f32, height as f32);
        Ok(non_max_suppression(raw, self.nms_threshold))
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&mut self, image: &GrayImage, min_size: (u32, u32), max_size: (u32, u32)) -> Vec<DetectionCandidate> {
        match self.run(image) {
            Ok(faces) => faces
                .into_iter()
                .filter(|(c, _)| {
                    c.width >= min_size.0 as f32
                        && c.height >= min_size.1 as f32
                        && c.width <= max_size.0 as f32
                        && c.height <= max_size.1 as f32
                })
                .map(|(c, _)| c)
                .collect(),
            Err(e) => {
                tracing::warn!("Face detection error: {}", e);
                Vec::new()
            }
        }
    }
}

/// Threshold anchor scores and convert normalized corners to pixel rectangles
fn decode_candidates(
    scores: &[f32],
    boxes: &[f32],
    score_threshold: f32,
    width: f32,
    height: f32,
) -> Vec<(DetectionCandidate, f32)> {
    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] > score_threshold)
        .map(|(score, corners)| {
            let x1 = corners[0].clamp(0.0, 1.0) * width;
            let y1 = corners[1].clamp(0.0, 1.0) * height;
            let x2 = corners[2].clamp(0.0, 1.0) * width;
            let y2 = corners[3].clamp(0.0, 1.0) * height;
            (
                DetectionCandidate::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0)),
                score[1],
            )
        })
        .collect()
}

fn iou(a: &DetectionCandidate, b: &DetectionCandidate) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let intersection = ix * iy;
    let union = a.width * a.height + b.width * b.height - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy hard NMS, highest score first
fn non_max_suppression(
    mut candidates: Vec<(DetectionCandidate, f32)>,
    iou_threshold: f32,
) -> Vec<(DetectionCandidate, f32)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<(DetectionCandidate, f32)> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|(k, _)| iou(k, &candidate.0) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_layout() {
        let image = GrayImage::from_pixel(640, 480, image::Luma([255]));
        let input = UltraFaceDetector::preprocess(&image);

        assert_eq!(input.len(), (INPUT_WIDTH * INPUT_HEIGHT * 3) as usize);
        let expected = (255.0 - PIXEL_MEAN) / PIXEL_SCALE;
        assert!(input.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_decode_thresholds_and_scales() {
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.25, 0.75, 0.5];
        let faces = decode_candidates(&scores, &boxes, 0.7, 320.0, 240.0);

        assert_eq!(faces.len(), 1);
        let (face, score) = faces[0];
        assert_eq!(score, 0.8);
        assert_eq!(face, DetectionCandidate::new(80.0, 60.0, 160.0, 60.0));
    }

    #[test]
    fn test_nms_drops_overlapping_lower_score() {
        let a = DetectionCandidate::new(0.0, 0.0, 100.0, 100.0);
        let b = DetectionCandidate::new(5.0, 5.0, 100.0, 100.0);
        let c = DetectionCandidate::new(200.0, 0.0, 50.0, 50.0);

        let kept = non_max_suppression(vec![(b, 0.8), (a, 0.95), (c, 0.75)], 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, a);
        assert_eq!(kept[1].0, c);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = DetectionCandidate::new(0.0, 0.0, 10.0, 10.0);
        let b = DetectionCandidate::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }
}
