//! Installation settings
//!
//! Loaded from `installation.json` next to the working directory. Every field
//! has a default so a partial (or missing) file still yields a usable setup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::proximity::ProximityTuning;
use crate::scheduler::ScheduleTuning;

/// File name looked up in the working directory at startup
pub const SETTINGS_FILE: &str = "installation.json";

/// Webcam capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 320,
            height: 240,
            frame_rate: 30,
        }
    }
}

/// Face detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSettings {
    /// Analyze one out of every `stride` new capture frames
    pub stride: u32,
    /// Model files relative to the asset root, in order of preference
    pub model_candidates: Vec<PathBuf>,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            stride: 2,
            model_candidates: vec![
                PathBuf::from("models/version-RFB-320.onnx"),
                PathBuf::from("models/version-slim-320.onnx"),
            ],
            score_threshold: 0.7,
            nms_threshold: 0.3,
        }
    }
}

/// Clip playlist parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    /// Clip directory relative to the asset root
    pub directory: PathBuf,
    /// Allowed extensions, matched case-insensitively
    pub extensions: Vec<String>,
    /// Logical frame clips are letterboxed into
    pub frame_width: u32,
    pub frame_height: u32,
    /// Dimension polls after opening a clip
    pub reload_retries: u32,
    pub reload_poll_ms: u64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("movies"),
            extensions: vec!["mov".to_string(), "mp4".to_string(), "avi".to_string()],
            frame_width: 720,
            frame_height: 540,
            reload_retries: 10,
            reload_poll_ms: 10,
        }
    }
}

/// Top-level installation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSettings {
    /// Directory every other asset path is resolved against
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,

    #[serde(default = "default_window_count")]
    pub window_count: usize,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Target frame rate (24-240)
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub proximity: ProximityTuning,

    #[serde(default)]
    pub schedule: ScheduleTuning,

    #[serde(default)]
    pub video: VideoSettings,

    /// Still images relative to the asset root, first existing one wins
    #[serde(default = "default_static_image_candidates")]
    pub static_image_candidates: Vec<PathBuf>,

    #[serde(default = "default_glitch_shader")]
    pub glitch_shader: PathBuf,

    /// Glitch intensity per unit of proximity
    #[serde(default = "default_glitch_gain")]
    pub glitch_gain: f32,
}

fn default_asset_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_window_count() -> usize {
    3
}

fn default_window_width() -> u32 {
    720
}

fn default_window_height() -> u32 {
    480
}

fn default_target_fps() -> u32 {
    60
}

fn default_static_image_candidates() -> Vec<PathBuf> {
    vec![PathBuf::from("images/test.jpg"), PathBuf::from("images/static.png")]
}

fn default_glitch_shader() -> PathBuf {
    PathBuf::from("shaders/glitch.wgsl")
}

fn default_glitch_gain() -> f32 {
    2.0
}

impl Default for InstallationSettings {
    fn default() -> Self {
        Self {
            asset_root: default_asset_root(),
            window_count: default_window_count(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            target_fps: default_target_fps(),
            capture: CaptureSettings::default(),
            detection: DetectionSettings::default(),
            proximity: ProximityTuning::default(),
            schedule: ScheduleTuning::default(),
            video: VideoSettings::default(),
            static_image_candidates: default_static_image_candidates(),
            glitch_shader: default_glitch_shader(),
            glitch_gain: default_glitch_gain(),
        }
    }
}

impl InstallationSettings {
    /// Clamp target FPS to valid range
    pub fn clamp_fps(&mut self) {
        self.target_fps = self.target_fps.clamp(24, 240);
    }

    /// Repair values that would stall or panic the engine
    pub fn validate(&mut self) {
        self.clamp_fps();
        self.window_count = self.window_count.max(1);
        self.window_width = self.window_width.max(1);
        self.window_height = self.window_height.max(1);
        self.capture.width = self.capture.width.max(1);
        self.capture.height = self.capture.height.max(1);
        self.detection.stride = self.detection.stride.max(1);
        self.video.frame_width = self.video.frame_width.max(1);
        self.video.frame_height = self.video.frame_height.max(1);
        self.proximity.sanitize();
        self.schedule.sanitize();
    }

    /// Load settings from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        let mut settings: Self = serde_json::from_str(&contents).map_err(SettingsError::Parse)?;
        settings.validate();
        Ok(settings)
    }

    /// Load from `installation.json` in the working directory, falling back to defaults
    pub fn load() -> Self {
        let path = PathBuf::from(SETTINGS_FILE);
        if !path.exists() {
            tracing::info!("No {} found, using default settings", SETTINGS_FILE);
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => {
                tracing::info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve a path against the asset root
    pub fn asset_path(&self, relative: &Path) -> PathBuf {
        self.asset_root.join(relative)
    }

    /// Resolve every candidate against the asset root
    pub fn asset_paths(&self, relatives: &[PathBuf]) -> Vec<PathBuf> {
        relatives.iter().map(|p| self.asset_path(p)).collect()
    }
}

/// Settings error types
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = InstallationSettings::default();
        assert_eq!(settings.window_count, 3);
        assert_eq!(settings.target_fps, 60);
        assert_eq!((settings.capture.width, settings.capture.height), (320, 240));
        assert_eq!(settings.detection.stride, 2);
        assert_eq!((settings.video.frame_width, settings.video.frame_height), (720, 540));
        assert_eq!(settings.glitch_gain, 2.0);
    }

    #[test]
    fn test_fps_clamping() {
        let mut settings = InstallationSettings {
            target_fps: 10,
            ..Default::default()
        };
        settings.clamp_fps();
        assert_eq!(settings.target_fps, 24);

        settings.target_fps = 500;
        settings.clamp_fps();
        assert_eq!(settings.target_fps, 240);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "windowCount": 4, "capture": {{ "cameraIndex": 1 }}, "detection": {{ "stride": 0 }} }}"#).unwrap();

        let settings = InstallationSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.window_count, 4);
        assert_eq!(settings.capture.camera_index, 1);
        assert_eq!(settings.capture.width, 320);
        // Zero stride would never analyze a frame
        assert_eq!(settings.detection.stride, 1);
        assert_eq!(settings.video.extensions, vec!["mov", "mp4", "avi"]);
    }

    #[test]
    fn test_validate_repairs_ranges() {
        let mut settings = InstallationSettings {
            window_count: 0,
            ..Default::default()
        };
        settings.schedule.swap_interval_min = 30.0;
        settings.schedule.swap_interval_max = 1.0;
        settings.proximity.min_aspect = 1.55;
        settings.proximity.max_aspect = 0.65;
        settings.video.frame_height = 0;

        settings.validate();
        assert_eq!(settings.window_count, 1);
        assert_eq!((settings.schedule.swap_interval_min, settings.schedule.swap_interval_max), (1.0, 30.0));
        assert_eq!((settings.proximity.min_aspect, settings.proximity.max_aspect), (0.65, 1.55));
        assert_eq!(settings.video.frame_height, 1);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = InstallationSettings::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_asset_path_resolution() {
        let settings = InstallationSettings::default();
        assert_eq!(
            settings.asset_path(Path::new("movies")),
            PathBuf::from("data").join("movies")
        );
    }
}
