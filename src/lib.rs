//! Proximity Glitch - multi-window video installation engine
//!
//! A webcam watches the room; the apparent size of the nearest face drives a
//! proximity signal that modulates a glitch effect, while a scheduler keeps
//! rotating which of the live camera, a video playlist and a still image
//! each display window shows.

pub mod camera;
pub mod detection;
pub mod display;
pub mod frame;
pub mod orchestrator;
pub mod proximity;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod telemetry;
pub mod video;

pub use frame::PixelFrame;
pub use orchestrator::{FrameOrchestrator, FrameSnapshot, SnapshotHandle};
pub use proximity::{ProximityEstimator, ProximityTuning};
pub use scheduler::{AssignmentScheduler, ScheduleTuning, SourceId, WindowAssignment};
pub use settings::InstallationSettings;
pub use video::{LetterboxGeometry, VideoLifecycleManager, VideoPlaylist};
