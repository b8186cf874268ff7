//! Letterbox geometry for clips inside the logical 4:3 frame

use crate::render::Viewport;

/// Where a clip sits inside the logical frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LetterboxGeometry {
    pub draw_width: f32,
    pub draw_height: f32,
    pub horizontal_offset: f32,
    pub vertical_offset: f32,
    pub frame_width: f32,
    pub frame_height: f32,
}

impl LetterboxGeometry {
    /// Fit a clip into the frame, centring the shorter axis
    pub fn compute(clip_width: u32, clip_height: u32, frame_width: u32, frame_height: u32) -> Self {
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        if clip_width == 0 || clip_height == 0 || frame_width == 0 || frame_height == 0 {
            return Self::degenerate(frame_width, frame_height);
        }

        let clip_aspect = clip_width as f32 / clip_height as f32;
        let frame_aspect = fw / fh;

        let (draw_width, draw_height) = if clip_aspect > frame_aspect {
            // Wider than the frame: fit to width
            (fw, fw / clip_aspect)
        } else {
            (fh * clip_aspect, fh)
        };

        Self {
            draw_width,
            draw_height,
            horizontal_offset: (fw - draw_width) / 2.0,
            vertical_offset: (fh - draw_height) / 2.0,
            frame_width: fw,
            frame_height: fh,
        }
    }

    /// Geometry for a clip whose size is unknown
    pub fn degenerate(frame_width: u32, frame_height: u32) -> Self {
        Self {
            draw_width: 0.0,
            draw_height: 0.0,
            horizontal_offset: 0.0,
            vertical_offset: 0.0,
            frame_width: frame_width as f32,
            frame_height: frame_height as f32,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.draw_width <= 0.0 || self.draw_height <= 0.0 || self.frame_width <= 0.0 || self.frame_height <= 0.0
    }

    /// Scale from the logical frame onto a target surface
    pub fn viewport(&self, target_width: u32, target_height: u32) -> Option<Viewport> {
        if self.is_degenerate() {
            return None;
        }
        let sx = target_width as f32 / self.frame_width;
        let sy = target_height as f32 / self.frame_height;
        Some(Viewport {
            x: self.horizontal_offset * sx,
            y: self.vertical_offset * sy,
            width: self.draw_width * sx,
            height: self.draw_height * sy,
        })
    }
}
