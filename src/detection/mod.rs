//! Face detection
//!
//! The engine only needs raw, unfiltered face rectangles from a grayscale
//! capture frame. Filtering and smoothing live in the proximity estimator.

mod ultraface;

use std::path::PathBuf;

use image::GrayImage;

pub use ultraface::UltraFaceDetector;

/// Axis-aligned rectangle in capture-frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCandidate {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DetectionCandidate {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Width over height, zero for degenerate rectangles
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Rescale from one pixel space into another
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

/// Face detector primitive
pub trait FaceDetector {
    /// Return every face whose size lies within `[min_size, max_size]` (width, height)
    fn detect(&mut self, image: &GrayImage, min_size: (u32, u32), max_size: (u32, u32)) -> Vec<DetectionCandidate>;
}

/// Detector that never reports a face, used when no model could be loaded
#[derive(Debug, Default)]
pub struct NullDetector;

impl FaceDetector for NullDetector {
    fn detect(&mut self, _image: &GrayImage, _min_size: (u32, u32), _max_size: (u32, u32)) -> Vec<DetectionCandidate> {
        Vec::new()
    }
}

/// Errors raised while preparing a detector
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no face model found (tried {tried:?})")]
    ModelNotFound { tried: Vec<PathBuf> },
    #[error("failed to load face model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// First existing model file from a preference-ordered list
pub fn resolve_model(candidates: &[PathBuf]) -> Result<PathBuf, DetectionError> {
    for candidate in candidates {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
        tracing::debug!("Face model not present: {}", candidate.display());
    }
    Err(DetectionError::ModelNotFound {
        tried: candidates.to_vec(),
    })
}

/// Load the best available detector, degrading to [`NullDetector`] with a warning
pub fn load_detector(candidates: &[PathBuf], score_threshold: f32, nms_threshold: f32) -> Box<dyn FaceDetector> {
    let loaded = resolve_model(candidates)
        .and_then(|path| UltraFaceDetector::load(&path, score_threshold, nms_threshold));

    match loaded {
        Ok(detector) => Box::new(detector),
        Err(e) => {
            tracing::warn!("{}. Face detection disabled.", e);
            Box::new(NullDetector)
        }
    }
}
