//! Face proximity estimation
//!
//! Turns noisy per-frame face rectangles into a smooth scalar in `[0, 1]`:
//! 0 when nobody is near the camera, 1 when a face fills most of the frame.
//! Detections are filtered by size and aspect, only trusted after several
//! consecutive frames, and every update is exponentially smoothed.

use serde::{Deserialize, Serialize};

use crate::detection::DetectionCandidate;

/// Filter, confirmation and smoothing constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProximityTuning {
    /// Smallest trusted face width as a fraction of the shorter frame side
    pub min_face_fraction: f32,
    /// Face width (same units) mapped to full proximity
    pub max_face_fraction: f32,
    /// Accepted width/height range
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Consecutive frames with a face before the target moves
    pub confirm_frames: u32,
    /// Target multiplier applied on every frame without a face
    pub decay: f32,
    /// Fraction of the remaining gap closed per update
    pub smoothing: f32,
}

impl Default for ProximityTuning {
    fn default() -> Self {
        Self {
            min_face_fraction: 0.20,
            max_face_fraction: 0.95,
            min_aspect: 0.65,
            max_aspect: 1.55,
            confirm_frames: 3,
            decay: 0.92,
            smoothing: 0.15,
        }
    }
}

impl ProximityTuning {
    pub(crate) fn sanitize(&mut self) {
        self.min_face_fraction = self.min_face_fraction.clamp(0.0, 1.0);
        self.max_face_fraction = self.max_face_fraction.clamp(0.0, 1.0);
        if self.max_face_fraction <= self.min_face_fraction {
            tracing::warn!(
                "maxFaceFraction {} <= minFaceFraction {}, using defaults",
                self.max_face_fraction,
                self.min_face_fraction
            );
            let defaults = Self::default();
            self.min_face_fraction = defaults.min_face_fraction;
            self.max_face_fraction = defaults.max_face_fraction;
        }
        if self.max_aspect < self.min_aspect {
            std::mem::swap(&mut self.min_aspect, &mut self.max_aspect);
        }
        self.confirm_frames = self.confirm_frames.max(1);
        self.decay = self.decay.clamp(0.0, 1.0);
        self.smoothing = self.smoothing.clamp(0.0, 1.0);
    }

    /// Size bounds handed to the face detector, as (min, max) squares in pixels
    pub fn detector_size_range(&self, frame_width: u32, frame_height: u32) -> ((u32, u32), (u32, u32)) {
        let min_dim = frame_width.min(frame_height) as f32;
        let min_size = (min_dim * self.min_face_fraction) as u32;
        let max_size = (min_dim * self.max_face_fraction) as u32;
        ((min_size, min_size), (max_size, max_size))
    }

    /// Whether a raw detection is plausible as a real face
    pub fn accepts(&self, candidate: &DetectionCandidate, frame_width: u32, frame_height: u32) -> bool {
        let min_dim = frame_width.min(frame_height) as f32;
        if candidate.width < min_dim * self.min_face_fraction {
            return false;
        }
        let aspect = candidate.aspect();
        (self.min_aspect..=self.max_aspect).contains(&aspect)
    }

    /// Detections that pass [`Self::accepts`]
    pub fn survivors(
        &self,
        candidates: &[DetectionCandidate],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<DetectionCandidate> {
        candidates
            .iter()
            .filter(|c| self.accepts(c, frame_width, frame_height))
            .copied()
            .collect()
    }
}

/// Smoothed proximity state machine
#[derive(Debug, Clone)]
pub struct ProximityEstimator {
    tuning: ProximityTuning,
    current: f32,
    target: f32,
    consecutive: u32,
}

impl ProximityEstimator {
    pub fn new(tuning: ProximityTuning) -> Self {
        Self::with_initial(tuning, 0.0)
    }

    /// Start from a known proximity, target included
    pub fn with_initial(tuning: ProximityTuning, value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self {
            tuning,
            current: value,
            target: value,
            consecutive: 0,
        }
    }

    /// Current smoothed proximity
    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn consecutive_detections(&self) -> u32 {
        self.consecutive
    }

    pub fn tuning(&self) -> &ProximityTuning {
        &self.tuning
    }

    /// Fold one analyzed frame's raw detections into the estimate
    pub fn observe(&mut self, candidates: &[DetectionCandidate], frame_width: u32, frame_height: u32) {
        let largest = candidates
            .iter()
            .filter(|c| self.tuning.accepts(c, frame_width, frame_height))
            .map(|c| c.width)
            .fold(None, |acc: Option<f32>, w| Some(acc.map_or(w, |a| a.max(w))));

        match largest {
            Some(width) => {
                self.consecutive = self.consecutive.saturating_add(1);
                if self.consecutive >= self.tuning.confirm_frames {
                    let min_dim = frame_width.min(frame_height) as f32;
                    let low = min_dim * self.tuning.min_face_fraction;
                    let high = min_dim * self.tuning.max_face_fraction;
                    self.target = if high > low {
                        ((width - low) / (high - low)).clamp(0.0, 1.0)
                    } else {
                        1.0
                    };
                }
            }
            None => {
                self.consecutive = 0;
                self.target = (self.target * self.tuning.decay).clamp(0.0, 1.0);
            }
        }

        self.smooth();
    }

    /// Advance smoothing on a frame that was not analyzed
    pub fn coast(&mut self) {
        self.smooth();
    }

    fn smooth(&mut self) {
        self.current += (self.target - self.current) * self.tuning.smoothing;
        self.current = self.current.clamp(0.0, 1.0);
    }
}
