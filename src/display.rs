//! One output window
//!
//! Couples a winit window with its own GPU context, a lazily created render
//! cache and a handle to the shared snapshot. Nothing here mutates engine
//! state.

use std::path::PathBuf;
use std::sync::Arc;

use winit::window::{Fullscreen, Window};

use crate::orchestrator::SnapshotHandle;
use crate::render::{DrawOutcome, RenderCache, RenderError, WgpuContext};

pub struct DisplayWindow {
    index: usize,
    window: Arc<Window>,
    /// `None` when the GPU context could not be created
    context: Option<WgpuContext>,
    cache: Option<RenderCache<WgpuContext>>,
    snapshots: SnapshotHandle,
    shader_path: PathBuf,
    glitch_gain: f32,
}

impl DisplayWindow {
    pub fn new(
        index: usize,
        window: Arc<Window>,
        context: Option<WgpuContext>,
        snapshots: SnapshotHandle,
        shader_path: PathBuf,
        glitch_gain: f32,
    ) -> Self {
        Self {
            index,
            window,
            context,
            cache: None,
            snapshots,
            shader_path,
            glitch_gain,
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(context) = self.context.as_mut() {
            context.resize(width, height);
        }
    }

    /// Recover from a lost or outdated surface
    pub fn reconfigure(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.reconfigure();
        }
    }

    /// Draw the latest snapshot, or a black placeholder before the first update
    pub fn draw(&mut self) -> Result<DrawOutcome, RenderError> {
        let Some(context) = self.context.as_mut() else {
            return Ok(DrawOutcome::Skipped);
        };

        if self.snapshots.load().frame_number == 0 {
            context.present_idle(&[format!("Window {} waiting for setup...", self.index)])?;
            return Ok(DrawOutcome::Drawn);
        }

        let index = self.index;
        let shader_path = &self.shader_path;
        let glitch_gain = self.glitch_gain;
        let cache = self
            .cache
            .get_or_insert_with(|| RenderCache::new(index, shader_path.clone(), glitch_gain));

        self.snapshots.draw(cache, context)
    }

    /// Toggle borderless fullscreen on the monitor the window is on
    pub fn toggle_fullscreen(&self) {
        if self.window.fullscreen().is_some() {
            self.window.set_fullscreen(None);
            tracing::info!("Window {} leaving fullscreen", self.index);
        } else {
            let monitor = self.window.current_monitor();
            self.window.set_fullscreen(Some(Fullscreen::Borderless(monitor)));
            tracing::info!("Window {} entering fullscreen", self.index);
        }
    }
}
