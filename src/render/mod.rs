//! Per-window rendering
//!
//! Each window owns an independent GPU context and a [`RenderCache`] of the
//! resources created in it. The cache decides *what* to draw from the frame
//! snapshot; a [`RenderBackend`] knows *how* to draw it.

mod cache;
mod wgpu_context;

use std::path::{Path, PathBuf};

use crate::detection::DetectionCandidate;
use crate::frame::PixelFrame;

pub use cache::{DrawOutcome, RenderCache};
pub use wgpu_context::WgpuContext;

/// Pixel rectangle on the output surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Anything with a pixel size
pub trait GpuResource {
    fn size(&self) -> (u32, u32);
}

/// How the offscreen framebuffer reaches the window surface
#[derive(Debug, Clone, Copy)]
pub enum Composite<'a, S> {
    /// Through the glitch shader
    Glitch { shader: &'a S, intensity: f32, time: f32 },
    /// Plain blit into a sub-rectangle
    Letterbox(Viewport),
    /// Plain blit over the whole surface
    Fullscreen,
}

/// Everything needed to render one window for one frame
pub struct FramePlan<'a, B: RenderBackend + ?Sized> {
    pub framebuffer: &'a B::Framebuffer,
    /// Drawn edge to edge into the framebuffer; black when absent
    pub content: Option<&'a B::Texture>,
    /// Outlined rectangles in framebuffer pixels
    pub overlays: &'a [DetectionCandidate],
    pub composite: Composite<'a, B::Shader>,
    /// Lines drawn on top of the composited surface
    pub debug_text: &'a [String],
}

/// Shader/GPU primitives of one rendering context
pub trait RenderBackend {
    type Shader;
    type Framebuffer: GpuResource;
    type Texture: GpuResource;

    /// Current drawable size in pixels
    fn surface_size(&self) -> (u32, u32);
    fn compile_shader(&mut self, path: &Path) -> Result<Self::Shader, RenderError>;
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<Self::Framebuffer, RenderError>;
    fn create_texture(&mut self, width: u32, height: u32) -> Self::Texture;
    /// Copy a frame into a texture of the same size
    fn upload(&mut self, texture: &Self::Texture, frame: &PixelFrame);
    fn render(&mut self, plan: FramePlan<'_, Self>) -> Result<(), RenderError>;
}

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("GPU initialization failed: {0}")]
    Init(String),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("cannot read shader {path}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shader {path} failed to compile: {message}")]
    ShaderCompile { path: PathBuf, message: String },
    #[error("zero-sized {0}")]
    ZeroSized(&'static str),
}
