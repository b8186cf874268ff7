//! Active clip lifecycle
//!
//! Pumps the clip decoder every frame, notices when the clip is over and
//! rotates to the next one. Each reload bumps a generation counter so render
//! contexts know to drop the texture of the previous clip.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{ClipDecoder, LetterboxGeometry, VideoPlaylist};
use crate::frame::PixelFrame;
use crate::settings::VideoSettings;

pub struct VideoLifecycleManager {
    playlist: VideoPlaylist,
    decoder: Box<dyn ClipDecoder>,
    geometry: LetterboxGeometry,
    latest_frame: Option<Arc<PixelFrame>>,
    generation: u64,
    /// A clip was loaded and told to play
    clip_active: bool,
    frame_size: (u32, u32),
    reload_retries: u32,
    reload_poll: Duration,
}

impl VideoLifecycleManager {
    pub fn new(playlist: VideoPlaylist, decoder: Box<dyn ClipDecoder>, settings: &VideoSettings) -> Self {
        let frame_size = (settings.frame_width, settings.frame_height);
        Self {
            playlist,
            decoder,
            geometry: LetterboxGeometry::degenerate(frame_size.0, frame_size.1),
            latest_frame: None,
            generation: 0,
            clip_active: false,
            frame_size,
            reload_retries: settings.reload_retries,
            reload_poll: Duration::from_millis(settings.reload_poll_ms),
        }
    }

    /// Load and play the clip under the playlist cursor
    pub fn start(&mut self) {
        if self.playlist.is_empty() {
            tracing::warn!("Video playlist is empty, video windows will stay black");
            return;
        }
        self.reload();
    }

    /// Advance playback; returns true when the clip was rotated this tick
    pub fn tick(&mut self) -> bool {
        self.decoder.update();
        if let Some(frame) = self.decoder.take_new_frame() {
            self.latest_frame = Some(Arc::new(frame));
        }

        if self.playlist.is_empty() {
            return false;
        }

        // The frame count is an estimate and may stay 0, so a stopped clip ends regardless
        let total = self.decoder.total_frames();
        let at_last_frame = total > 0 && self.decoder.current_frame_index() + 1 >= total;
        let stopped = !self.decoder.is_playing() && !self.decoder.has_failed();
        let finished = self.clip_active && (at_last_frame || stopped);
        let failed = self.decoder.has_failed() && self.playlist.len() > 1;

        if finished || failed {
            let next = self.playlist.advance();
            tracing::info!(next, finished, failed, "Rotating to next clip");
            self.reload();
            return true;
        }
        false
    }

    /// Close the current clip and open the one under the cursor
    pub fn reload(&mut self) {
        self.decoder.close();
        self.clip_active = false;
        self.latest_frame = None;
        self.generation += 1;
        self.geometry = LetterboxGeometry::degenerate(self.frame_size.0, self.frame_size.1);

        let count = self.playlist.rescan();
        if self.playlist.current().is_none() && count > 0 {
            tracing::warn!(
                "Clip index {} out of range ({} clips found), restarting from the first clip",
                self.playlist.current_index(),
                count
            );
            self.playlist.rewind();
        }
        let Some(path) = self.playlist.current().map(Path::to_path_buf) else {
            tracing::warn!("No clips left in {}", self.playlist.directory().display());
            return;
        };

        if !self.decoder.load(&path) {
            tracing::warn!("Failed to load clip {}", path.display());
            return;
        }

        let mut dimensions = None;
        for attempt in 0..=self.reload_retries {
            self.decoder.update();
            if let Some(dims) = self.decoder.dimensions() {
                dimensions = Some(dims);
                break;
            }
            if self.decoder.has_failed() || attempt == self.reload_retries {
                break;
            }
            std::thread::sleep(self.reload_poll);
        }

        match dimensions {
            Some((width, height)) => {
                self.geometry = LetterboxGeometry::compute(width, height, self.frame_size.0, self.frame_size.1);
                tracing::info!(
                    "Loaded clip {} ({}x{}), letterbox {:.1}x{:.1} at ({:.1}, {:.1})",
                    path.display(),
                    width,
                    height,
                    self.geometry.draw_width,
                    self.geometry.draw_height,
                    self.geometry.horizontal_offset,
                    self.geometry.vertical_offset
                );
            }
            None => {
                tracing::warn!("Clip {} size not known yet, drawing unletterboxed", path.display());
            }
        }

        self.decoder.play();
        self.clip_active = true;
    }

    pub fn current_index(&self) -> usize {
        self.playlist.current_index()
    }

    pub fn geometry(&self) -> LetterboxGeometry {
        self.geometry
    }

    pub fn latest_frame(&self) -> Option<Arc<PixelFrame>> {
        self.latest_frame.clone()
    }

    /// Incremented on every reload
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// Scripted decoder whose state the test can poke at
    #[derive(Debug, Default)]
    pub(crate) struct FakeClipState {
        pub loads: Vec<PathBuf>,
        pub closes: u32,
        pub updates: u32,
        pub plays: u32,
        pub current_frame: u64,
        pub clip_frames: u64,
        pub clip_size: Option<(u32, u32)>,
        /// Updates needed after `load` before the size is known
        pub size_after_updates: u32,
        pub playing: bool,
        pub loaded: bool,
        pub failed: bool,
        pub pending_frame: Option<PixelFrame>,
        updates_since_load: u32,
    }

    impl FakeClipState {
        fn size_known(&self) -> bool {
            self.loaded && self.updates_since_load > self.size_after_updates
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct FakeClipDecoder(pub Arc<Mutex<FakeClipState>>);

    impl ClipDecoder for FakeClipDecoder {
        fn load(&mut self, path: &Path) -> bool {
            let mut s = self.0.lock();
            s.loads.push(path.to_path_buf());
            s.loaded = true;
            s.current_frame = 0;
            s.updates_since_load = 0;
            true
        }

        fn close(&mut self) {
            let mut s = self.0.lock();
            s.closes += 1;
            s.loaded = false;
            s.playing = false;
        }

        fn play(&mut self) {
            let mut s = self.0.lock();
            s.plays += 1;
            s.playing = s.loaded;
        }

        fn update(&mut self) {
            let mut s = self.0.lock();
            s.updates += 1;
            s.updates_since_load += 1;
        }

        fn current_frame_index(&self) -> u64 {
            self.0.lock().current_frame
        }

        fn total_frames(&self) -> u64 {
            let s = self.0.lock();
            if s.size_known() {
                s.clip_frames
            } else {
                0
            }
        }

        fn is_playing(&self) -> bool {
            self.0.lock().playing
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            let s = self.0.lock();
            if s.size_known() {
                s.clip_size
            } else {
                None
            }
        }

        fn take_new_frame(&mut self) -> Option<PixelFrame> {
            self.0.lock().pending_frame.take()
        }

        fn has_failed(&self) -> bool {
            self.0.lock().failed
        }
    }

    fn clip_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    fn manager(dir: &Path, fake: &FakeClipDecoder) -> VideoLifecycleManager {
        let settings = VideoSettings {
            reload_poll_ms: 0,
            ..Default::default()
        };
        let playlist = VideoPlaylist::discover(dir, &settings.extensions);
        VideoLifecycleManager::new(playlist, Box::new(fake.clone()), &settings)
    }

    fn fake_clip(frames: u64, size: (u32, u32)) -> FakeClipDecoder {
        let fake = FakeClipDecoder::default();
        {
            let mut s = fake.0.lock();
            s.clip_frames = frames;
            s.clip_size = Some(size);
        }
        fake
    }

    #[test]
    fn test_start_loads_first_clip_with_geometry() {
        let dir = clip_dir(&["a.mp4", "b.mov"]);
        let fake = fake_clip(100, (1280, 720));
        let mut video = manager(dir.path(), &fake);

        video.start();

        assert_eq!(video.current_index(), 0);
        assert_eq!(video.generation(), 1);
        let geometry = video.geometry();
        assert_eq!((geometry.draw_width, geometry.draw_height), (720.0, 405.0));
        assert_eq!(geometry.vertical_offset, 67.5);

        let s = fake.0.lock();
        assert_eq!(s.loads, vec![dir.path().join("a.mp4")]);
        assert_eq!(s.plays, 1);
    }

    #[test]
    fn test_last_frame_rotates_to_next_clip() {
        let dir = clip_dir(&["a.mp4", "b.mov"]);
        let fake = fake_clip(100, (1280, 720));
        let mut video = manager(dir.path(), &fake);
        video.start();

        fake.0.lock().current_frame = 50;
        assert!(!video.tick());
        assert_eq!(video.current_index(), 0);

        fake.0.lock().current_frame = 99;
        assert!(video.tick());
        assert_eq!(video.current_index(), 1);
        assert_eq!(video.generation(), 2);
        assert_eq!(fake.0.lock().loads.last(), Some(&dir.path().join("b.mov")));

        fake.0.lock().current_frame = 99;
        assert!(video.tick());
        assert_eq!(video.current_index(), 0);
        assert_eq!(fake.0.lock().loads.len(), 3);
    }

    #[test]
    fn test_stopped_clip_rotates() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(100, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        fake.0.lock().playing = false;
        assert!(video.tick());
        assert_eq!(video.current_index(), 1);
    }

    #[test]
    fn test_stopped_clip_of_unknown_length_rotates() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(0, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        // Still playing with no frame count: nothing to compare against
        fake.0.lock().current_frame = 500;
        for _ in 0..10 {
            assert!(!video.tick());
        }
        assert_eq!(video.current_index(), 0);

        fake.0.lock().playing = false;
        assert!(video.tick());
        assert_eq!(video.current_index(), 1);
        assert_eq!(fake.0.lock().loads.len(), 2);
    }

    #[test]
    fn test_size_poll_is_bounded() {
        let dir = clip_dir(&["a.mp4"]);
        let fake = fake_clip(100, (640, 480));
        fake.0.lock().size_after_updates = u32::MAX;
        let mut video = manager(dir.path(), &fake);

        video.start();

        assert!(video.geometry().is_degenerate());
        // Initial poll plus ten retries
        assert_eq!(fake.0.lock().updates, 11);
        assert_eq!(fake.0.lock().plays, 1);
    }

    #[test]
    fn test_late_size_is_picked_up_by_poll() {
        let dir = clip_dir(&["a.mp4"]);
        let fake = fake_clip(100, (720, 540));
        fake.0.lock().size_after_updates = 3;
        let mut video = manager(dir.path(), &fake);

        video.start();

        assert!(!video.geometry().is_degenerate());
        assert_eq!(fake.0.lock().updates, 4);
    }

    #[test]
    fn test_reload_drops_previous_frame() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(100, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        fake.0.lock().pending_frame = Some(PixelFrame::new(vec![0; 16], 2, 2, 0));
        video.tick();
        assert!(video.latest_frame().is_some());

        video.reload();
        assert!(video.latest_frame().is_none());
        assert_eq!(video.generation(), 2);
    }

    #[test]
    fn test_empty_playlist_is_inert() {
        let dir = clip_dir(&[]);
        let fake = fake_clip(100, (640, 480));
        let mut video = manager(dir.path(), &fake);

        video.start();
        assert!(!video.tick());
        assert!(fake.0.lock().loads.is_empty());
        assert!(video.geometry().is_degenerate());
    }

    #[test]
    fn test_failed_clip_is_skipped() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(0, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        fake.0.lock().failed = true;
        assert!(video.tick());
        assert_eq!(video.current_index(), 1);
    }

    #[test]
    fn test_shrunk_directory_restarts_from_first_clip() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(100, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        std::fs::remove_file(dir.path().join("b.mp4")).unwrap();
        fake.0.lock().current_frame = 99;
        assert!(video.tick());

        assert_eq!(video.current_index(), 0);
        assert_eq!(fake.0.lock().loads.len(), 2);
        assert_eq!(fake.0.lock().loads.last(), Some(&dir.path().join("a.mp4")));
        assert!(!video.geometry().is_degenerate());
    }

    #[test]
    fn test_emptied_directory_stays_idle() {
        let dir = clip_dir(&["a.mp4", "b.mp4"]);
        let fake = fake_clip(100, (640, 480));
        let mut video = manager(dir.path(), &fake);
        video.start();

        std::fs::remove_file(dir.path().join("a.mp4")).unwrap();
        std::fs::remove_file(dir.path().join("b.mp4")).unwrap();
        fake.0.lock().current_frame = 99;
        assert!(video.tick());
        assert_eq!(fake.0.lock().loads.len(), 1);
        assert!(video.geometry().is_degenerate());

        // Nothing loaded, so nothing to rotate away from
        for _ in 0..5 {
            assert!(!video.tick());
        }
        assert_eq!(fake.0.lock().loads.len(), 1);
    }
}
