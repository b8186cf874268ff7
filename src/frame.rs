//! CPU-side pixel frames
//!
//! Camera captures, decoded clip frames and the static image all travel
//! through the engine as tightly packed RGBA buffers. Each frame carries a
//! serial so render contexts can tell whether they already uploaded it.

use image::{GrayImage, RgbaImage};

/// A tightly packed RGBA frame
#[derive(Debug, Clone)]
pub struct PixelFrame {
    /// RGBA pixel data (4 bytes/pixel, no row padding)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Monotonic serial assigned by the producer
    pub serial: u64,
}

impl PixelFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, serial: u64) -> Self {
        Self {
            data,
            width,
            height,
            serial,
        }
    }

    /// Build a frame from a decoded image
    pub fn from_rgba_image(image: RgbaImage, serial: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, serial)
    }

    /// Get the expected data size for frame dimensions (width * height * 4)
    pub fn expected_size(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 4
    }

    /// Check if the frame data has the correct size
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == Self::expected_size(self.width, self.height)
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        (self.width as usize) * 4
    }

    /// Luma conversion used as face-detector input
    pub fn to_grayscale(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        for (pixel, rgba) in gray.pixels_mut().zip(self.data.chunks_exact(4)) {
            let luma = 0.299 * rgba[0] as f32 + 0.587 * rgba[1] as f32 + 0.114 * rgba[2] as f32;
            pixel.0[0] = luma.round().clamp(0.0, 255.0) as u8;
        }
        gray
    }

    /// Nearest-neighbour resample into a new frame with the same serial
    pub fn downscale(&self, target_width: u32, target_height: u32) -> PixelFrame {
        if self.width == target_width && self.height == target_height {
            return self.clone();
        }

        let mut output = vec![0u8; Self::expected_size(target_width, target_height)];
        let x_ratio = self.width as f32 / target_width as f32;
        let y_ratio = self.height as f32 / target_height as f32;

        for y in 0..target_height {
            for x in 0..target_width {
                let src_x = (x as f32 * x_ratio) as u32;
                let src_y = (y as f32 * y_ratio) as u32;
                let src_idx = ((src_y * self.width + src_x) * 4) as usize;
                let dst_idx = ((y * target_width + x) * 4) as usize;

                if src_idx + 3 < self.data.len() {
                    output[dst_idx..dst_idx + 4].copy_from_slice(&self.data[src_idx..src_idx + 4]);
                }
            }
        }

        PixelFrame::new(output, target_width, target_height, self.serial)
    }

    /// Largest centered region with the aspect ratio of `aspect_width:aspect_height`
    pub fn center_crop(&self, aspect_width: u32, aspect_height: u32) -> PixelFrame {
        if aspect_width == 0 || aspect_height == 0 || !self.is_valid() {
            return self.clone();
        }

        let (w, h) = (self.width as u64, self.height as u64);
        let (aw, ah) = (aspect_width as u64, aspect_height as u64);
        let (crop_width, crop_height) = if w * ah > h * aw {
            (((h * aw) / ah).max(1) as u32, self.height)
        } else {
            (self.width, ((w * ah) / aw).max(1) as u32)
        };
        if (crop_width, crop_height) == (self.width, self.height) {
            return self.clone();
        }

        let x0 = ((self.width - crop_width) / 2) as usize;
        let y0 = ((self.height - crop_height) / 2) as usize;
        let row_bytes = crop_width as usize * 4;
        let mut data = Vec::with_capacity(Self::expected_size(crop_width, crop_height));
        for y in y0..y0 + crop_height as usize {
            let start = (y * self.width as usize + x0) * 4;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        PixelFrame::new(data, crop_width, crop_height, self.serial)
    }

    /// Fill `target_width x target_height` without distorting: crop to the
    /// target aspect, then resample
    pub fn cover(&self, target_width: u32, target_height: u32) -> PixelFrame {
        self.center_crop(target_width, target_height)
            .downscale(target_width, target_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let data = vec![0u8; PixelFrame::expected_size(320, 240)];
        let frame = PixelFrame::new(data, 320, 240, 7);

        assert!(frame.is_valid());
        assert_eq!(frame.stride(), 320 * 4);
        assert_eq!(frame.serial, 7);
    }

    #[test]
    fn test_truncated_frame_is_invalid() {
        let frame = PixelFrame::new(vec![0u8; 10], 4, 4, 0);
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_grayscale_weights() {
        let frame = PixelFrame::new(vec![255, 0, 0, 255, 255, 255, 255, 255], 2, 1, 0);
        let gray = frame.to_grayscale();
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_downscale_keeps_serial() {
        let data: Vec<u8> = (0..16u8).flat_map(|v| [v, v, v, 255]).collect();
        let frame = PixelFrame::new(data, 4, 4, 42);
        let small = frame.downscale(2, 2);

        assert_eq!((small.width, small.height), (2, 2));
        assert_eq!(small.serial, 42);
        assert!(small.is_valid());
        // Top-left of each 2x2 block
        assert_eq!(small.data[0], 0);
        assert_eq!(small.data[4], 2);
        assert_eq!(small.data[8], 8);
    }

    #[test]
    fn test_center_crop_trims_the_long_axis() {
        // Red channel holds the column, green the row
        let data: Vec<u8> = (0..9u8).flat_map(|y| (0..16u8).flat_map(move |x| [x, y, 0, 255])).collect();
        let wide = PixelFrame::new(data, 16, 9, 3);

        let cropped = wide.center_crop(4, 3);
        assert_eq!((cropped.width, cropped.height), (12, 9));
        assert!(cropped.is_valid());
        assert_eq!(cropped.serial, 3);
        assert_eq!(&cropped.data[0..2], &[2, 0]);
        assert_eq!(cropped.data[cropped.stride() - 4], 13);

        let tall = PixelFrame::new(vec![0; PixelFrame::expected_size(4, 8)], 4, 8, 0);
        assert_eq!(tall.center_crop(4, 3).height, 3);
        assert_eq!(tall.center_crop(1, 2).width, 4);
    }

    #[test]
    fn test_cover_keeps_face_proportions_from_wide_camera() {
        use crate::detection::DetectionCandidate;
        use crate::proximity::ProximityTuning;

        // 16:9 capture with a 300x360 white face box
        let (width, height) = (1280u32, 720u32);
        let mut data = vec![0u8; PixelFrame::expected_size(width, height)];
        for y in 180..540usize {
            for x in 490..790usize {
                let i = (y * width as usize + x) * 4;
                data[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let analyzed = PixelFrame::new(data, width, height, 1).cover(320, 240);
        assert_eq!((analyzed.width, analyzed.height), (320, 240));

        let white: Vec<(u32, u32)> = (0..240u32)
            .flat_map(|y| (0..320u32).map(move |x| (x, y)))
            .filter(|&(x, y)| analyzed.data[((y * 320 + x) * 4) as usize] == 255)
            .collect();
        let min_x = white.iter().map(|p| p.0).min().unwrap();
        let max_x = white.iter().map(|p| p.0).max().unwrap();
        let min_y = white.iter().map(|p| p.1).min().unwrap();
        let max_y = white.iter().map(|p| p.1).max().unwrap();

        let face = DetectionCandidate::new(
            min_x as f32,
            min_y as f32,
            (max_x - min_x + 1) as f32,
            (max_y - min_y + 1) as f32,
        );
        assert_eq!((face.width, face.height), (100.0, 120.0));
        assert!(ProximityTuning::default().accepts(&face, 320, 240));
    }
}
