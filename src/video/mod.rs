//! Clip playback
//!
//! Clips are discovered from an asset directory, decoded with FFmpeg on a
//! background thread, played once each and rotated in file-name order. The
//! lifecycle manager owns the active clip and its letterbox geometry.

mod decoder;
mod letterbox;
pub(crate) mod lifecycle;
mod player;
mod playlist;

use std::path::Path;

use crate::frame::PixelFrame;

pub use decoder::{VideoDecoder, VideoDecoderError};
pub use letterbox::LetterboxGeometry;
pub use lifecycle::VideoLifecycleManager;
pub use player::ClipPlayer;
pub use playlist::VideoPlaylist;

/// Single-clip decoder as seen by the lifecycle manager
///
/// Implementations may open clips asynchronously: `dimensions` and
/// `total_frames` stay unknown until a later `update` observes them.
pub trait ClipDecoder {
    /// Start opening a clip, replacing any current one
    fn load(&mut self, path: &Path) -> bool;
    fn close(&mut self);
    fn play(&mut self);
    /// Pump state from the decoding side
    fn update(&mut self);
    fn current_frame_index(&self) -> u64;
    /// Estimated frame count, 0 while unknown
    fn total_frames(&self) -> u64;
    fn is_playing(&self) -> bool;
    fn dimensions(&self) -> Option<(u32, u32)>;
    /// Newest decoded frame since the last call
    fn take_new_frame(&mut self) -> Option<PixelFrame>;
    fn has_failed(&self) -> bool {
        false
    }
}
