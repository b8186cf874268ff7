//! Frame orchestration
//!
//! [`FrameOrchestrator`] owns every piece of mutable engine state: capture,
//! detection, proximity, scheduling and video playback. Window 0 drives one
//! `update()` per logical frame, which ends by publishing an immutable
//! [`FrameSnapshot`]. Every window then draws from that snapshot through its
//! own [`SnapshotHandle`], so a draw can never observe a half-applied tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::camera::{CameraCapture, CaptureDevice, DisconnectedCamera};
use crate::detection::{self, DetectionCandidate, FaceDetector};
use crate::frame::PixelFrame;
use crate::proximity::ProximityEstimator;
use crate::render::{DrawOutcome, RenderBackend, RenderCache, RenderError};
use crate::scheduler::{AssignmentScheduler, SourceId};
use crate::settings::InstallationSettings;
use crate::video::{ClipPlayer, LetterboxGeometry, VideoLifecycleManager, VideoPlaylist};

/// Frames between periodic detection summaries in the log
const DEBUG_LOG_INTERVAL: u64 = 60;

/// Everything a window needs to draw one logical frame
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    /// Number of completed updates, 0 before the first
    pub frame_number: u64,
    /// Seconds since the orchestrator was created
    pub time: f64,
    /// Effective source per window, mirror override applied
    pub assignment: Vec<SourceId>,
    pub proximity: f32,
    pub webcam: Option<Arc<PixelFrame>>,
    /// Resolution detections are expressed in
    pub capture_size: (u32, u32),
    /// Detections that passed the proximity filters
    pub faces: Vec<DetectionCandidate>,
    pub raw_detection_count: usize,
    pub first_raw_width: Option<f32>,
    pub video: Option<Arc<PixelFrame>>,
    pub clip_generation: u64,
    pub letterbox: LetterboxGeometry,
    pub static_image: Option<Arc<PixelFrame>>,
}

impl FrameSnapshot {
    pub fn source_for(&self, window: usize) -> Option<SourceId> {
        self.assignment.get(window).copied()
    }
}

/// Read side of the published snapshot, cloned into every window
#[derive(Clone, Default)]
pub struct SnapshotHandle(Arc<RwLock<Arc<FrameSnapshot>>>);

impl SnapshotHandle {
    /// Latest published snapshot
    pub fn load(&self) -> Arc<FrameSnapshot> {
        self.0.read().clone()
    }

    pub(crate) fn publish(&self, snapshot: FrameSnapshot) {
        *self.0.write() = Arc::new(snapshot);
    }

    /// Render the latest snapshot into one window's context
    pub fn draw<B: RenderBackend>(&self, cache: &mut RenderCache<B>, backend: &mut B) -> Result<DrawOutcome, RenderError> {
        let snapshot = self.load();
        cache.draw(backend, &snapshot)
    }
}

/// Collaborators the orchestrator drives
pub struct OrchestratorParts {
    pub capture: Box<dyn CaptureDevice>,
    pub detector: Box<dyn FaceDetector>,
    pub scheduler: AssignmentScheduler,
    pub video: VideoLifecycleManager,
    pub static_image: Option<Arc<PixelFrame>>,
}

impl OrchestratorParts {
    /// Open the real devices and assets named by `settings`
    pub fn from_settings(settings: &InstallationSettings) -> Self {
        let capture: Box<dyn CaptureDevice> = match CameraCapture::new(&settings.capture) {
            Ok(camera) => Box::new(camera),
            Err(e) => {
                tracing::warn!("{}. Running without a camera.", e);
                Box::new(DisconnectedCamera::new(&settings.capture))
            }
        };

        let detector = detection::load_detector(
            &settings.asset_paths(&settings.detection.model_candidates),
            settings.detection.score_threshold,
            settings.detection.nms_threshold,
        );

        let playlist = VideoPlaylist::discover(
            settings.asset_path(&settings.video.directory),
            &settings.video.extensions,
        );
        let video = VideoLifecycleManager::new(playlist, Box::new(ClipPlayer::new()), &settings.video);

        Self {
            capture,
            detector,
            scheduler: AssignmentScheduler::new(settings.window_count, settings.schedule.clone()),
            video,
            static_image: load_static_image(&settings.asset_paths(&settings.static_image_candidates)),
        }
    }
}

/// First decodable image of a preference-ordered candidate list
pub fn load_static_image(candidates: &[PathBuf]) -> Option<Arc<PixelFrame>> {
    for path in candidates {
        if !path.exists() {
            tracing::debug!("Static image not present: {}", path.display());
            continue;
        }
        match image::open(path) {
            Ok(img) => {
                let frame = PixelFrame::from_rgba_image(img.to_rgba8(), 0);
                tracing::info!("Loaded static image {} ({}x{})", path.display(), frame.width, frame.height);
                return Some(Arc::new(frame));
            }
            Err(e) => tracing::warn!("Failed to decode static image {}: {}", path.display(), e),
        }
    }
    tracing::warn!("No static image found (tried {:?}), still-image window will be black", candidates);
    None
}

/// Owner of all per-frame engine state
pub struct FrameOrchestrator {
    capture: Box<dyn CaptureDevice>,
    detector: Box<dyn FaceDetector>,
    estimator: ProximityEstimator,
    scheduler: AssignmentScheduler,
    video: VideoLifecycleManager,
    static_image: Option<Arc<PixelFrame>>,

    detection_stride: u64,
    new_capture_frames: u64,
    frame_number: u64,
    faces: Vec<DetectionCandidate>,
    raw_detections: Vec<DetectionCandidate>,
    is_setup: bool,
    started: Instant,
    snapshots: SnapshotHandle,
}

impl FrameOrchestrator {
    pub fn new(settings: &InstallationSettings, parts: OrchestratorParts) -> Self {
        let orchestrator = Self {
            capture: parts.capture,
            detector: parts.detector,
            estimator: ProximityEstimator::new(settings.proximity.clone()),
            scheduler: parts.scheduler,
            video: parts.video,
            static_image: parts.static_image,
            detection_stride: u64::from(settings.detection.stride.max(1)),
            new_capture_frames: 0,
            frame_number: 0,
            faces: Vec::new(),
            raw_detections: Vec::new(),
            is_setup: false,
            started: Instant::now(),
            snapshots: SnapshotHandle::default(),
        };
        orchestrator.publish(0.0);
        orchestrator
    }

    /// Build with real devices from `settings`
    pub fn from_settings(settings: &InstallationSettings) -> Self {
        Self::new(settings, OrchestratorParts::from_settings(settings))
    }

    /// Start clip playback; safe to call more than once
    pub fn setup(&mut self) {
        if self.is_setup {
            return;
        }
        self.is_setup = true;
        self.video.start();
        tracing::info!(
            "Orchestrator ready: {} windows, assignment {:?}",
            self.scheduler.assignment().window_count(),
            self.scheduler.assignment().effective()
        );
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Handle for windows to read snapshots from
    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    pub fn proximity(&self) -> f32 {
        self.estimator.value()
    }

    pub fn source_for(&self, window: usize) -> Option<SourceId> {
        self.scheduler.source_for(window)
    }

    pub fn letterbox(&self) -> LetterboxGeometry {
        self.video.geometry()
    }

    /// Advance one logical frame using wall-clock time
    pub fn update(&mut self) {
        let now = self.started.elapsed().as_secs_f64();
        self.update_at(now);
    }

    /// Advance one logical frame at `now` seconds since start
    pub fn update_at(&mut self, now: f64) {
        if !self.is_setup {
            self.setup();
        }
        self.frame_number += 1;

        self.capture.update();
        if !self.analyze_capture() {
            self.estimator.coast();
        }

        if self.frame_number % DEBUG_LOG_INTERVAL == 0 {
            let widths: Vec<f32> = self.raw_detections.iter().map(|d| d.width).collect();
            tracing::debug!(
                frame = self.frame_number,
                raw = self.raw_detections.len(),
                accepted = self.faces.len(),
                proximity = self.estimator.value(),
                "Detections: widths {:?}",
                widths
            );
        }

        let report = self.scheduler.tick(now);
        if let Some(outcome) = report.shuffle {
            tracing::debug!("Reshuffle at {:.2}s: {:?}", now, outcome);
        }

        self.video.tick();

        self.publish(now);
    }

    /// Run detection on every `stride`-th new capture frame; true if it ran
    fn analyze_capture(&mut self) -> bool {
        if !self.capture.is_frame_new() {
            return false;
        }
        self.new_capture_frames += 1;
        if (self.new_capture_frames - 1) % self.detection_stride != 0 {
            return false;
        }
        let Some(frame) = self.capture.pixels() else {
            return false;
        };
        if !frame.is_valid() {
            return false;
        }

        let tuning = self.estimator.tuning().clone();
        let gray = frame.to_grayscale();
        let (min_size, max_size) = tuning.detector_size_range(frame.width, frame.height);
        let raw = self.detector.detect(&gray, min_size, max_size);

        self.estimator.observe(&raw, frame.width, frame.height);
        self.faces = tuning.survivors(&raw, frame.width, frame.height);
        tracing::trace!(raw = raw.len(), accepted = self.faces.len(), "Analyzed capture frame {}", frame.serial);
        self.raw_detections = raw;
        true
    }

    fn publish(&self, now: f64) {
        self.snapshots.publish(FrameSnapshot {
            frame_number: self.frame_number,
            time: now,
            assignment: self.scheduler.assignment().effective(),
            proximity: self.estimator.value(),
            webcam: self.capture.pixels(),
            capture_size: self.capture.resolution(),
            faces: self.faces.clone(),
            raw_detection_count: self.raw_detections.len(),
            first_raw_width: self.raw_detections.first().map(|d| d.width),
            video: self.video.latest_frame(),
            clip_generation: self.video.generation(),
            letterbox: self.video.geometry(),
            static_image: self.static_image.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScheduleTuning;
    use crate::settings::VideoSettings;
    use crate::video::lifecycle::tests::FakeClipDecoder;
    use image::GrayImage;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Capture that yields whatever frame the test queued before `update`
    #[derive(Clone, Default)]
    struct ScriptedCapture {
        queued: Arc<Mutex<Option<PixelFrame>>>,
        current: Option<Arc<PixelFrame>>,
        new: bool,
    }

    impl CaptureDevice for ScriptedCapture {
        fn update(&mut self) {
            self.new = false;
            if let Some(frame) = self.queued.lock().take() {
                self.current = Some(Arc::new(frame));
                self.new = true;
            }
        }

        fn is_frame_new(&self) -> bool {
            self.new
        }

        fn pixels(&self) -> Option<Arc<PixelFrame>> {
            self.current.clone()
        }

        fn resolution(&self) -> (u32, u32) {
            (320, 240)
        }
    }

    struct ScriptedDetector {
        faces: Arc<Mutex<Vec<DetectionCandidate>>>,
        calls: Arc<AtomicUsize>,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _image: &GrayImage, _min: (u32, u32), _max: (u32, u32)) -> Vec<DetectionCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.faces.lock().clone()
        }
    }

    struct Rig {
        orchestrator: FrameOrchestrator,
        queued: Arc<Mutex<Option<PixelFrame>>>,
        faces: Arc<Mutex<Vec<DetectionCandidate>>>,
        calls: Arc<AtomicUsize>,
        clip: FakeClipDecoder,
        _clips: tempfile::TempDir,
    }

    impl Rig {
        fn new(stride: u32) -> Self {
            let mut settings = InstallationSettings::default();
            settings.detection.stride = stride;

            let clips = tempfile::tempdir().unwrap();
            std::fs::write(clips.path().join("a.mp4"), b"").unwrap();
            std::fs::write(clips.path().join("b.mp4"), b"").unwrap();

            let clip = FakeClipDecoder::default();
            {
                let mut state = clip.0.lock();
                state.clip_size = Some((1280, 720));
                state.clip_frames = 1000;
            }

            let capture = ScriptedCapture::default();
            let queued = capture.queued.clone();
            let faces = Arc::new(Mutex::new(Vec::new()));
            let calls = Arc::new(AtomicUsize::new(0));

            let video_settings = VideoSettings {
                reload_poll_ms: 0,
                ..Default::default()
            };
            let playlist = VideoPlaylist::discover(clips.path(), &video_settings.extensions);

            let parts = OrchestratorParts {
                capture: Box::new(capture),
                detector: Box::new(ScriptedDetector {
                    faces: faces.clone(),
                    calls: calls.clone(),
                }),
                scheduler: AssignmentScheduler::with_seed(3, ScheduleTuning::default(), 7),
                video: VideoLifecycleManager::new(playlist, Box::new(clip.clone()), &video_settings),
                static_image: Some(Arc::new(PixelFrame::new(vec![255; 16], 2, 2, 0))),
            };

            Self {
                orchestrator: FrameOrchestrator::new(&settings, parts),
                queued,
                faces,
                calls,
                clip,
                _clips: clips,
            }
        }

        fn queue_frame(&self, serial: u64) {
            *self.queued.lock() = Some(PixelFrame::new(vec![0; 320 * 240 * 4], 320, 240, serial));
        }
    }

    #[test]
    fn test_initial_snapshot_before_update() {
        let rig = Rig::new(2);
        let snapshot = rig.orchestrator.snapshots().load();
        assert_eq!(snapshot.frame_number, 0);
        assert_eq!(snapshot.assignment, SourceId::ALL.to_vec());
        assert_eq!(snapshot.proximity, 0.0);
        assert!(snapshot.webcam.is_none());
        assert!(!rig.orchestrator.is_setup());
    }

    #[test]
    fn test_first_update_runs_setup() {
        let mut rig = Rig::new(2);
        rig.orchestrator.update_at(0.0);
        assert!(rig.orchestrator.is_setup());
        assert_eq!(rig.clip.0.lock().loads.len(), 1);

        let snapshot = rig.orchestrator.snapshots().load();
        assert_eq!(snapshot.frame_number, 1);
        assert_eq!(snapshot.clip_generation, 1);
        assert_eq!(snapshot.letterbox, LetterboxGeometry::compute(1280, 720, 720, 540));
        assert!(snapshot.static_image.is_some());
    }

    #[test]
    fn test_detection_runs_on_stride() {
        let mut rig = Rig::new(2);
        for i in 0..6 {
            rig.queue_frame(i + 1);
            rig.orchestrator.update_at(i as f64 * 0.016);
        }
        assert_eq!(rig.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_new_frame_skips_detection() {
        let mut rig = Rig::new(1);
        rig.queue_frame(1);
        rig.orchestrator.update_at(0.0);
        rig.orchestrator.update_at(0.016);
        rig.orchestrator.update_at(0.032);
        assert_eq!(rig.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_confirmed_face_raises_proximity() {
        let mut rig = Rig::new(1);
        *rig.faces.lock() = vec![
            DetectionCandidate::new(10.0, 10.0, 20.0, 20.0),
            DetectionCandidate::new(40.0, 40.0, 200.0, 200.0),
        ];

        for i in 0..3 {
            rig.queue_frame(i + 1);
            rig.orchestrator.update_at(i as f64 * 0.016);
            if i < 2 {
                assert_eq!(rig.orchestrator.proximity(), 0.0);
            }
        }
        assert!(rig.orchestrator.proximity() > 0.0);

        let snapshot = rig.orchestrator.snapshots().load();
        assert_eq!(snapshot.proximity, rig.orchestrator.proximity());
        assert_eq!(snapshot.raw_detection_count, 2);
        assert_eq!(snapshot.first_raw_width, Some(20.0));
        assert_eq!(snapshot.faces, vec![DetectionCandidate::new(40.0, 40.0, 200.0, 200.0)]);
        assert_eq!(snapshot.capture_size, (320, 240));
        assert_eq!(snapshot.webcam.as_ref().map(|f| f.serial), Some(3));
    }

    #[test]
    fn test_published_snapshots_are_immutable() {
        let mut rig = Rig::new(2);
        rig.orchestrator.update_at(0.0);
        let held = rig.orchestrator.snapshots().load();

        rig.orchestrator.update_at(0.016);
        assert_eq!(held.frame_number, 1);
        assert_eq!(rig.orchestrator.snapshots().load().frame_number, 2);
    }

    #[test]
    fn test_reshuffle_reaches_snapshot() {
        let mut rig = Rig::new(2);
        rig.orchestrator.update_at(0.0);
        rig.orchestrator.update_at(31.0);

        let snapshot = rig.orchestrator.snapshots().load();
        assert_ne!(snapshot.assignment, SourceId::ALL.to_vec());
        for source in SourceId::ALL {
            assert_eq!(snapshot.assignment.iter().filter(|s| **s == source).count(), 1);
        }
        assert_eq!(snapshot.source_for(0), rig.orchestrator.source_for(0));
    }

    #[test]
    fn test_video_frames_flow_into_snapshot() {
        let mut rig = Rig::new(2);
        rig.orchestrator.update_at(0.0);
        rig.clip.0.lock().pending_frame = Some(PixelFrame::new(vec![0; 64], 4, 4, 9));
        rig.orchestrator.update_at(0.016);

        let snapshot = rig.orchestrator.snapshots().load();
        assert_eq!(snapshot.video.as_ref().map(|f| f.serial), Some(9));
    }

    #[test]
    fn test_static_image_fallback_chain() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("test.jpg");
        let present = dir.path().join("static.png");
        image::RgbaImage::new(4, 3).save(&present).unwrap();

        let frame = load_static_image(&[missing.clone(), present]).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert!(frame.is_valid());

        assert!(load_static_image(&[missing]).is_none());
    }
}
