//! Camera capture module
//!
//! Captures webcam frames on a background thread using nokhwa. The render
//! thread polls once per frame and sees at most one new frame, center-cropped
//! and downscaled to the configured analysis resolution.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::frame::PixelFrame;
use crate::settings::CaptureSettings;

/// Source of live frames
pub trait CaptureDevice {
    /// Poll for a frame captured since the last update
    fn update(&mut self);
    /// Whether the last `update` produced a new frame
    fn is_frame_new(&self) -> bool;
    /// Latest frame, if any has arrived yet
    fn pixels(&self) -> Option<Arc<PixelFrame>>;
    fn resolution(&self) -> (u32, u32);
}

/// Errors starting a capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type FrameSlots = [Arc<Mutex<Option<PixelFrame>>>; 3];

/// Webcam capture via nokhwa
pub struct CameraCapture {
    /// Triple-buffered latest frames written by the capture thread
    frames: FrameSlots,
    /// Write index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Incremented for every captured frame, 0 until the first
    captured: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    width: u32,
    height: u32,
    current: Option<Arc<PixelFrame>>,
    frame_new: bool,
}

impl CameraCapture {
    /// Start capturing from the configured camera
    pub fn new(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let frames: FrameSlots = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let captured = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let captured_clone = captured.clone();
        let running_clone = running.clone();
        let thread_settings = settings.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    thread_settings,
                    frames_clone,
                    latest_frame_idx_clone,
                    captured_clone,
                    running_clone,
                );
            })?;

        Ok(Self {
            frames,
            latest_frame_idx,
            captured,
            running,
            thread_handle: Some(thread_handle),
            width: settings.width,
            height: settings.height,
            current: None,
            frame_new: false,
        })
    }

    fn open_camera(settings: &CaptureSettings) -> Option<Camera> {
        let index = CameraIndex::Index(settings.camera_index);
        let preferred = CameraFormat::new(
            Resolution::new(settings.width, settings.height),
            FrameFormat::MJPEG,
            settings.frame_rate,
        );

        let attempts = [
            RequestedFormatType::Closest(preferred),
            RequestedFormatType::AbsoluteHighestFrameRate,
            RequestedFormatType::None,
        ];

        for requested in attempts {
            let description = format!("{:?}", requested);
            match Camera::new(index.clone(), RequestedFormat::new::<RgbAFormat>(requested)) {
                Ok(camera) => return Some(camera),
                Err(e) => tracing::warn!("Failed to open camera with {}: {:?}", description, e),
            }
        }
        None
    }

    fn capture_thread(
        settings: CaptureSettings,
        frames: FrameSlots,
        latest_frame_idx: Arc<AtomicU64>,
        captured: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!("Starting camera capture thread (camera {})", settings.camera_index);

        let Some(mut camera) = Self::open_camera(&settings) else {
            tracing::error!("Failed to open camera {} with all format attempts", settings.camera_index);
            return;
        };

        if let Err(e) = camera.open_stream() {
            tracing::error!("Failed to open camera stream: {:?}", e);
            return;
        }

        tracing::info!(
            "Camera opened: {} ({}x{} @ {}fps)",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height(),
            camera.frame_rate()
        );

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(buffer) => match buffer.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let serial = captured.fetch_add(1, Ordering::Relaxed) + 1;
                        let frame = PixelFrame::new(
                            image.into_raw(),
                            buffer.resolution().width(),
                            buffer.resolution().height(),
                            serial,
                        );

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(frame);
                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }

        tracing::info!("Camera capture thread stopped");
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureDevice for CameraCapture {
    fn update(&mut self) {
        self.frame_new = false;
        if self.captured.load(Ordering::Acquire) == 0 {
            return;
        }

        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        let latest = self.frames[slot].lock().clone();
        let Some(frame) = latest else { return };

        let seen = self.current.as_ref().map(|f| f.serial).unwrap_or(0);
        if frame.serial <= seen {
            return;
        }

        // Cropped rather than stretched so face proportions survive 16:9 modes
        self.current = Some(Arc::new(frame.cover(self.width, self.height)));
        self.frame_new = true;
    }

    fn is_frame_new(&self) -> bool {
        self.frame_new
    }

    fn pixels(&self) -> Option<Arc<PixelFrame>> {
        self.current.clone()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stand-in used when no camera could be started; never produces a frame
#[derive(Debug, Clone, Copy)]
pub struct DisconnectedCamera {
    width: u32,
    height: u32,
}

impl DisconnectedCamera {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
        }
    }
}

impl CaptureDevice for DisconnectedCamera {
    fn update(&mut self) {}

    fn is_frame_new(&self) -> bool {
        false
    }

    fn pixels(&self) -> Option<Arc<PixelFrame>> {
        None
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_camera_never_yields() {
        let mut camera = DisconnectedCamera::new(&CaptureSettings::default());
        camera.update();
        assert!(!camera.is_frame_new());
        assert!(camera.pixels().is_none());
        assert_eq!(camera.resolution(), (320, 240));
    }
}
