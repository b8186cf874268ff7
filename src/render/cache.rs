//! Per-window GPU resource cache
//!
//! Resources are never shared across contexts: every window keeps its own
//! framebuffer, shader and one texture per source, uploading lazily and only
//! when the frame it would show has changed.

use std::path::PathBuf;

use super::{Composite, FramePlan, GpuResource, RenderBackend, RenderError};
use crate::detection::DetectionCandidate;
use crate::frame::PixelFrame;
use crate::orchestrator::FrameSnapshot;
use crate::scheduler::SourceId;

/// Seconds between attempts to recompile a broken shader
const SHADER_RETRY_SECS: f64 = 5.0;

/// Period of the shader clock; keeps f32 precision over weeks of uptime
const SHADER_TIME_WRAP_SECS: f64 = 3600.0;

enum ShaderSlot<S> {
    Pending,
    Ready(S),
    Failed { retry_at: f64 },
}

struct TextureSlot<T> {
    texture: T,
    serial: u64,
}

/// What a call to [`RenderCache::draw`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// The surface has no area, nothing was rendered
    Skipped,
}

/// GPU resources owned by one window's rendering context
pub struct RenderCache<B: RenderBackend> {
    window_index: usize,
    shader_path: PathBuf,
    glitch_gain: f32,
    shader: ShaderSlot<B::Shader>,
    framebuffer: Option<B::Framebuffer>,
    webcam: Option<TextureSlot<B::Texture>>,
    video: Option<TextureSlot<B::Texture>>,
    video_generation: u64,
    still: Option<B::Texture>,
}

impl<B: RenderBackend> RenderCache<B> {
    pub fn new(window_index: usize, shader_path: PathBuf, glitch_gain: f32) -> Self {
        Self {
            window_index,
            shader_path,
            glitch_gain,
            shader: ShaderSlot::Pending,
            framebuffer: None,
            webcam: None,
            video: None,
            video_generation: 0,
            still: None,
        }
    }

    pub fn shader_ready(&self) -> bool {
        matches!(self.shader, ShaderSlot::Ready(_))
    }

    /// Render this window's assigned source from `snapshot`
    pub fn draw(&mut self, backend: &mut B, snapshot: &FrameSnapshot) -> Result<DrawOutcome, RenderError> {
        let (width, height) = backend.surface_size();
        if width == 0 || height == 0 {
            return Ok(DrawOutcome::Skipped);
        }

        let needs_framebuffer = self
            .framebuffer
            .as_ref()
            .map(|fb| fb.size() != (width, height))
            .unwrap_or(true);
        if needs_framebuffer {
            self.framebuffer = Some(backend.create_framebuffer(width, height)?);
        }

        let source = snapshot.assignment.get(self.window_index).copied();
        if source == Some(SourceId::Webcam) {
            self.ensure_shader(backend, snapshot.time);
        }
        if snapshot.clip_generation != self.video_generation {
            self.video = None;
            self.video_generation = snapshot.clip_generation;
        }

        let mut overlays: Vec<DetectionCandidate> = Vec::new();
        let mut debug_text: Vec<String> = Vec::new();

        let (content, composite) = match source {
            Some(SourceId::Webcam) => {
                let content = match snapshot.webcam.as_deref() {
                    Some(frame) => Self::refresh(backend, &mut self.webcam, frame),
                    None => None,
                };

                let (cw, ch) = snapshot.capture_size;
                if cw > 0 && ch > 0 {
                    let sx = width as f32 / cw as f32;
                    let sy = height as f32 / ch as f32;
                    overlays = snapshot.faces.iter().map(|f| f.scaled(sx, sy)).collect();
                }

                debug_text.push(format!("Proximity: {:.2}", snapshot.proximity));
                debug_text.push(format!("Faces detected: {}", snapshot.raw_detection_count));
                if let Some(face_width) = snapshot.first_raw_width {
                    debug_text.push(format!("Face size: {:.0}px", face_width));
                }

                let composite = match &self.shader {
                    ShaderSlot::Ready(shader) => Composite::Glitch {
                        shader,
                        intensity: snapshot.proximity * self.glitch_gain,
                        time: (snapshot.time % SHADER_TIME_WRAP_SECS) as f32,
                    },
                    _ => Composite::Fullscreen,
                };
                (content, composite)
            }
            Some(SourceId::Video) => {
                let content = match snapshot.video.as_deref() {
                    Some(frame) => Self::refresh(backend, &mut self.video, frame),
                    None => None,
                };
                let composite = snapshot
                    .letterbox
                    .viewport(width, height)
                    .map(Composite::Letterbox)
                    .unwrap_or(Composite::Fullscreen);
                (content, composite)
            }
            Some(SourceId::StaticImage) => {
                if self.still.is_none() {
                    if let Some(frame) = snapshot.static_image.as_deref().filter(|f| f.is_valid()) {
                        let texture = backend.create_texture(frame.width, frame.height);
                        backend.upload(&texture, frame);
                        self.still = Some(texture);
                    }
                }
                (self.still.as_ref(), Composite::Fullscreen)
            }
            None => (None, Composite::Fullscreen),
        };

        let Some(framebuffer) = self.framebuffer.as_ref() else {
            return Err(RenderError::ZeroSized("framebuffer"));
        };

        backend.render(FramePlan {
            framebuffer,
            content,
            overlays: &overlays,
            composite,
            debug_text: &debug_text,
        })?;

        Ok(DrawOutcome::Drawn)
    }

    fn ensure_shader(&mut self, backend: &mut B, time: f64) {
        let due = match self.shader {
            ShaderSlot::Pending => true,
            ShaderSlot::Failed { retry_at } => time >= retry_at,
            ShaderSlot::Ready(_) => false,
        };
        if !due {
            return;
        }

        self.shader = match backend.compile_shader(&self.shader_path) {
            Ok(shader) => {
                tracing::info!("Window {}: glitch shader ready", self.window_index);
                ShaderSlot::Ready(shader)
            }
            Err(e) => {
                tracing::warn!(
                    "Window {}: {}. Drawing webcam without glitch, retrying in {}s",
                    self.window_index,
                    e,
                    SHADER_RETRY_SECS
                );
                ShaderSlot::Failed {
                    retry_at: time + SHADER_RETRY_SECS,
                }
            }
        };
    }

    /// Keep `slot` holding `frame`, uploading only when the serial or size changed
    fn refresh<'s>(
        backend: &mut B,
        slot: &'s mut Option<TextureSlot<B::Texture>>,
        frame: &PixelFrame,
    ) -> Option<&'s B::Texture> {
        if !frame.is_valid() {
            return slot.as_ref().map(|s| &s.texture);
        }

        let resized = slot
            .as_ref()
            .map(|s| s.texture.size() != (frame.width, frame.height))
            .unwrap_or(true);

        if resized {
            let texture = backend.create_texture(frame.width, frame.height);
            backend.upload(&texture, frame);
            *slot = Some(TextureSlot {
                texture,
                serial: frame.serial,
            });
        } else if let Some(existing) = slot.as_mut() {
            if existing.serial != frame.serial {
                backend.upload(&existing.texture, frame);
                existing.serial = frame.serial;
            }
        }

        slot.as_ref().map(|s| &s.texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Viewport;
    use crate::video::LetterboxGeometry;
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeTexture {
        id: usize,
        width: u32,
        height: u32,
    }

    impl GpuResource for FakeTexture {
        fn size(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Drawn {
        Glitch { intensity: f32, time: f32 },
        Letterbox(Viewport),
        Fullscreen,
    }

    #[derive(Debug, Clone)]
    struct Recorded {
        content: Option<usize>,
        overlays: Vec<DetectionCandidate>,
        composite: Drawn,
        text: Vec<String>,
    }

    #[derive(Default)]
    struct RecordingBackend {
        surface: (u32, u32),
        shader_broken: bool,
        compiles: usize,
        framebuffers: usize,
        textures: usize,
        uploads: Vec<(usize, u64)>,
        renders: Vec<Recorded>,
    }

    impl RecordingBackend {
        fn new(width: u32, height: u32) -> Self {
            Self {
                surface: (width, height),
                ..Default::default()
            }
        }

        fn last(&self) -> &Recorded {
            self.renders.last().unwrap()
        }
    }

    impl RenderBackend for RecordingBackend {
        type Shader = String;
        type Framebuffer = FakeTexture;
        type Texture = FakeTexture;

        fn surface_size(&self) -> (u32, u32) {
            self.surface
        }

        fn compile_shader(&mut self, path: &Path) -> Result<String, RenderError> {
            self.compiles += 1;
            if self.shader_broken {
                Err(RenderError::ShaderCompile {
                    path: path.to_path_buf(),
                    message: "syntax error".to_string(),
                })
            } else {
                Ok(path.display().to_string())
            }
        }

        fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FakeTexture, RenderError> {
            self.framebuffers += 1;
            Ok(FakeTexture { id: 0, width, height })
        }

        fn create_texture(&mut self, width: u32, height: u32) -> FakeTexture {
            self.textures += 1;
            FakeTexture {
                id: self.textures,
                width,
                height,
            }
        }

        fn upload(&mut self, texture: &FakeTexture, frame: &PixelFrame) {
            self.uploads.push((texture.id, frame.serial));
        }

        fn render(&mut self, plan: FramePlan<'_, Self>) -> Result<(), RenderError> {
            let composite = match plan.composite {
                Composite::Glitch { intensity, time, .. } => Drawn::Glitch { intensity, time },
                Composite::Letterbox(vp) => Drawn::Letterbox(vp),
                Composite::Fullscreen => Drawn::Fullscreen,
            };
            self.renders.push(Recorded {
                content: plan.content.map(|t| t.id),
                overlays: plan.overlays.to_vec(),
                composite,
                text: plan.debug_text.to_vec(),
            });
            Ok(())
        }
    }

    fn frame(width: u32, height: u32, serial: u64) -> Arc<PixelFrame> {
        Arc::new(PixelFrame::new(vec![0; (width * height * 4) as usize], width, height, serial))
    }

    fn snapshot(assignment: Vec<SourceId>) -> FrameSnapshot {
        FrameSnapshot {
            assignment,
            capture_size: (320, 240),
            ..Default::default()
        }
    }

    fn cache(window: usize) -> RenderCache<RecordingBackend> {
        RenderCache::new(window, PathBuf::from("data/shaders/glitch.wgsl"), 2.0)
    }

    #[test]
    fn test_zero_sized_surface_skips() {
        let mut backend = RecordingBackend::new(0, 480);
        let mut cache = cache(0);
        let outcome = cache.draw(&mut backend, &snapshot(SourceId::ALL.to_vec())).unwrap();
        assert_eq!(outcome, DrawOutcome::Skipped);
        assert!(backend.renders.is_empty());
        assert_eq!(backend.framebuffers, 0);
    }

    #[test]
    fn test_framebuffer_follows_surface_size() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(2);
        let snap = snapshot(SourceId::ALL.to_vec());

        cache.draw(&mut backend, &snap).unwrap();
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.framebuffers, 1);

        backend.surface = (1920, 1080);
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.framebuffers, 2);
    }

    #[test]
    fn test_webcam_uploads_only_new_frames() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(0);
        let mut snap = snapshot(SourceId::ALL.to_vec());

        snap.webcam = Some(frame(320, 240, 1));
        cache.draw(&mut backend, &snap).unwrap();
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.uploads, vec![(1, 1)]);

        snap.webcam = Some(frame(320, 240, 2));
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.uploads, vec![(1, 1), (1, 2)]);
        assert_eq!(backend.textures, 1);
        assert_eq!(backend.last().content, Some(1));
    }

    #[test]
    fn test_webcam_window_gets_glitch_overlays_and_text() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut cache = cache(1);
        let mut snap = snapshot(vec![SourceId::Video, SourceId::Webcam, SourceId::StaticImage]);
        snap.proximity = 0.25;
        snap.faces = vec![DetectionCandidate::new(10.0, 20.0, 100.0, 100.0)];
        snap.raw_detection_count = 2;
        snap.first_raw_width = Some(30.0);

        cache.draw(&mut backend, &snap).unwrap();
        let drawn = backend.last();
        assert_eq!(drawn.composite, Drawn::Glitch { intensity: 0.5, time: 0.0 });
        assert_eq!(drawn.overlays, vec![DetectionCandidate::new(20.0, 40.0, 200.0, 200.0)]);
        assert_eq!(
            drawn.text,
            vec!["Proximity: 0.25", "Faces detected: 2", "Face size: 30px"]
        );
    }

    #[test]
    fn test_shader_clock_wraps_on_long_uptime() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut cache = cache(0);
        let mut snap = snapshot(SourceId::ALL.to_vec());

        // Ten days in, where f32 seconds would only resolve to 1/16 s
        snap.time = 864_000.25;
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.last().composite, Drawn::Glitch { intensity: 0.0, time: 0.25 });

        snap.time = 864_000.25 + 1.0 / 60.0;
        cache.draw(&mut backend, &snap).unwrap();
        let Drawn::Glitch { time, .. } = &backend.last().composite else {
            panic!("webcam window should be glitched");
        };
        assert!((*time - (0.25 + 1.0 / 60.0) as f32).abs() < 1e-4);
    }

    #[test]
    fn test_other_windows_have_no_overlays_or_text() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut cache = cache(0);
        let mut snap = snapshot(vec![SourceId::StaticImage, SourceId::Webcam, SourceId::Video]);
        snap.faces = vec![DetectionCandidate::new(10.0, 20.0, 100.0, 100.0)];
        snap.static_image = Some(frame(8, 8, 0));

        cache.draw(&mut backend, &snap).unwrap();
        let drawn = backend.last();
        assert!(drawn.overlays.is_empty());
        assert!(drawn.text.is_empty());
        assert_eq!(drawn.composite, Drawn::Fullscreen);
        assert_eq!(backend.compiles, 0);
    }

    #[test]
    fn test_broken_shader_falls_back_and_retries() {
        let mut backend = RecordingBackend::new(640, 480);
        backend.shader_broken = true;
        let mut cache = cache(0);
        let mut snap = snapshot(SourceId::ALL.to_vec());

        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.last().composite, Drawn::Fullscreen);
        assert_eq!(backend.compiles, 1);

        snap.time = 4.0;
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.compiles, 1);

        backend.shader_broken = false;
        snap.time = 5.0;
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.compiles, 2);
        assert!(cache.shader_ready());
        assert!(matches!(backend.last().composite, Drawn::Glitch { .. }));
    }

    #[test]
    fn test_video_is_letterboxed() {
        let mut backend = RecordingBackend::new(1440, 1080);
        let mut cache = cache(1);
        let mut snap = snapshot(SourceId::ALL.to_vec());
        snap.video = Some(frame(1280, 720, 1));
        snap.letterbox = LetterboxGeometry::compute(1280, 720, 720, 540);

        cache.draw(&mut backend, &snap).unwrap();
        let expected = Viewport {
            x: 0.0,
            y: 135.0,
            width: 1440.0,
            height: 810.0,
        };
        assert_eq!(backend.last().composite, Drawn::Letterbox(expected));
    }

    #[test]
    fn test_degenerate_letterbox_draws_fullscreen() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(1);
        let mut snap = snapshot(SourceId::ALL.to_vec());
        snap.video = Some(frame(16, 16, 1));

        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.last().composite, Drawn::Fullscreen);
    }

    #[test]
    fn test_new_clip_drops_stale_video_texture() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(1);
        let mut snap = snapshot(SourceId::ALL.to_vec());
        snap.video = Some(frame(16, 16, 5));
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.last().content, Some(1));

        // Reload in progress: no frame yet from the new clip
        snap.clip_generation = 1;
        snap.video = None;
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.last().content, None);

        // Same serial as before, different clip: must still upload
        snap.video = Some(frame(16, 16, 5));
        cache.draw(&mut backend, &snap).unwrap();
        assert_eq!(backend.uploads, vec![(1, 5), (2, 5)]);
    }

    #[test]
    fn test_static_image_uploaded_once() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(2);
        let mut snap = snapshot(SourceId::ALL.to_vec());
        snap.static_image = Some(frame(32, 32, 0));

        for _ in 0..5 {
            cache.draw(&mut backend, &snap).unwrap();
        }
        assert_eq!(backend.uploads.len(), 1);
        assert_eq!(backend.last().content, Some(1));
    }

    #[test]
    fn test_missing_source_clears_to_black() {
        let mut backend = RecordingBackend::new(720, 480);
        let mut cache = cache(2);
        cache.draw(&mut backend, &snapshot(SourceId::ALL.to_vec())).unwrap();
        assert_eq!(backend.last().content, None);
        assert!(backend.uploads.is_empty());
    }
}
