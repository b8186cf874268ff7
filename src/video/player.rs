//! Background-threaded clip player
//!
//! Opens and decodes a clip on a background thread at its native frame rate.
//! The main thread picks up the newest frame without blocking and learns
//! about the clip's metadata and end-of-clip through a control channel.
//! Clips play once; reaching the end reports `Finished` instead of looping.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::{ClipDecoder, VideoDecoder};
use crate::frame::PixelFrame;

/// Shared state between decode thread and main thread
struct SharedState {
    /// The latest decoded frame (if any)
    current_frame: Mutex<Option<PixelFrame>>,
    /// Whether a new frame is available for pickup
    new_frame_available: AtomicBool,
    /// Whether the decode thread should keep running
    running: AtomicBool,
    /// Set once `play` is called; the thread holds at the first frame until then
    play_requested: AtomicBool,
    /// Index of the newest decoded frame
    frame_index: AtomicU64,
}

impl SharedState {
    fn new() -> Self {
        Self {
            current_frame: Mutex::new(None),
            new_frame_available: AtomicBool::new(false),
            running: AtomicBool::new(true),
            play_requested: AtomicBool::new(false),
            frame_index: AtomicU64::new(0),
        }
    }
}

/// Messages from the decode thread
enum PlayerEvent {
    Opened {
        width: u32,
        height: u32,
        total_frames: u64,
    },
    Finished,
    Failed(String),
}

/// One decode thread per loaded clip
struct ActiveClip {
    state: Arc<SharedState>,
    events: Receiver<PlayerEvent>,
    thread_handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl ActiveClip {
    fn stop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!("Failed to join decode thread: {:?}", e);
            }
        }
    }
}

/// FFmpeg-backed [`ClipDecoder`]
#[derive(Default)]
pub struct ClipPlayer {
    active: Option<ActiveClip>,
    dimensions: Option<(u32, u32)>,
    total_frames: u64,
    playing: bool,
    failed: bool,
}

impl ClipPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the loaded clip
    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|clip| clip.path.as_path())
    }

    /// Background decode loop
    fn decode_loop(state: Arc<SharedState>, events: Sender<PlayerEvent>, path: PathBuf) {
        let mut decoder = match VideoDecoder::open(&path) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Failed to open video in decode thread: {}", e);
                let _ = events.send(PlayerEvent::Failed(e.to_string()));
                return;
            }
        };

        let _ = events.send(PlayerEvent::Opened {
            width: decoder.width(),
            height: decoder.height(),
            total_frames: decoder.estimated_frame_count(),
        });

        // Decode first frame immediately so the window has something to show
        if let Ok(Some(frame)) = decoder.decode_next_frame() {
            state.frame_index.store(frame.serial, Ordering::Release);
            *state.current_frame.lock() = Some(frame);
            state.new_frame_available.store(true, Ordering::Release);
        }

        while state.running.load(Ordering::Acquire) && !state.play_requested.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
        }

        let frame_duration = Duration::from_secs_f64(1.0 / decoder.frame_rate());
        let mut next_frame_time = Instant::now() + frame_duration;

        while state.running.load(Ordering::Acquire) {
            // Wait until next frame time (only if we're ahead of schedule)
            let now = Instant::now();
            if now < next_frame_time {
                let sleep_time = next_frame_time - now;
                if sleep_time > Duration::from_micros(500) {
                    thread::sleep(sleep_time - Duration::from_micros(500));
                }
                while Instant::now() < next_frame_time {
                    std::hint::spin_loop();
                }
            }

            match decoder.decode_next_frame() {
                Ok(Some(frame)) => {
                    state.frame_index.store(frame.serial, Ordering::Release);
                    *state.current_frame.lock() = Some(frame);
                    state.new_frame_available.store(true, Ordering::Release);
                }
                Ok(None) => {
                    tracing::debug!("ClipPlayer: end of {}", path.display());
                    let _ = events.send(PlayerEvent::Finished);
                    break;
                }
                Err(e) => {
                    tracing::error!("Decode error: {}", e);
                    let _ = events.send(PlayerEvent::Failed(e.to_string()));
                    break;
                }
            }

            next_frame_time += frame_duration;

            // If we fell behind, reset to now (don't try to catch up)
            let now = Instant::now();
            if next_frame_time < now {
                next_frame_time = now;
            }
        }

        tracing::debug!("ClipPlayer decode thread stopped");
    }
}

impl ClipDecoder for ClipPlayer {
    fn load(&mut self, path: &Path) -> bool {
        self.close();

        let state = Arc::new(SharedState::new());
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread_state = Arc::clone(&state);
        let thread_path = path.to_path_buf();

        let spawned = thread::Builder::new()
            .name("clip-decode".to_string())
            .spawn(move || Self::decode_loop(thread_state, sender, thread_path));

        match spawned {
            Ok(handle) => {
                self.active = Some(ActiveClip {
                    state,
                    events: receiver,
                    thread_handle: Some(handle),
                    path: path.to_path_buf(),
                });
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn decode thread: {}", e);
                self.failed = true;
                false
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut clip) = self.active.take() {
            clip.stop();
        }
        self.dimensions = None;
        self.total_frames = 0;
        self.playing = false;
        self.failed = false;
    }

    fn play(&mut self) {
        if let Some(clip) = &self.active {
            clip.state.play_requested.store(true, Ordering::Release);
            self.playing = !self.failed;
        }
    }

    fn update(&mut self) {
        let Some(clip) = &self.active else { return };

        while let Ok(event) = clip.events.try_recv() {
            match event {
                PlayerEvent::Opened {
                    width,
                    height,
                    total_frames,
                } => {
                    self.dimensions = Some((width, height));
                    self.total_frames = total_frames;
                }
                PlayerEvent::Finished => {
                    self.playing = false;
                }
                PlayerEvent::Failed(message) => {
                    tracing::warn!("Clip {} failed: {}", clip.path.display(), message);
                    self.playing = false;
                    self.failed = true;
                }
            }
        }
    }

    fn current_frame_index(&self) -> u64 {
        self.active
            .as_ref()
            .map(|clip| clip.state.frame_index.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn take_new_frame(&mut self) -> Option<PixelFrame> {
        let clip = self.active.as_ref()?;
        if clip.state.new_frame_available.swap(false, Ordering::AcqRel) {
            return clip.state.current_frame.lock().take();
        }
        None
    }

    fn has_failed(&self) -> bool {
        self.failed
    }
}

impl Drop for ClipPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_clip_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"not a video").unwrap();

        let mut player = ClipPlayer::new();
        assert!(player.load(&path));
        assert_eq!(player.path(), Some(path.as_path()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !player.has_failed() && Instant::now() < deadline {
            player.update();
            thread::sleep(Duration::from_millis(5));
        }

        assert!(player.has_failed());
        assert_eq!(player.dimensions(), None);
        assert!(!player.is_playing());
        assert!(player.take_new_frame().is_none());
    }

    #[test]
    fn test_close_resets_state() {
        let mut player = ClipPlayer::new();
        player.close();
        assert_eq!(player.total_frames(), 0);
        assert_eq!(player.current_frame_index(), 0);
        assert!(player.path().is_none());
    }
}
