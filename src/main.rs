//! Proximity Glitch - Main Entry Point
//!
//! Opens one window per display, side by side. Window 0 drives the engine:
//! each of its frames runs one orchestrator update, draws itself, then asks
//! every other window to draw the same snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use proximity_glitch::display::DisplayWindow;
use proximity_glitch::render::{RenderError, WgpuContext};
use proximity_glitch::telemetry::{init_logging, LogConfig};
use proximity_glitch::{FrameOrchestrator, InstallationSettings};
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Proximity Glitch";

struct InstallationApp {
    settings: InstallationSettings,
    orchestrator: Option<FrameOrchestrator>,
    windows: Vec<DisplayWindow>,
    window_index: HashMap<WindowId, usize>,
    next_redraw_at: Instant,
}

impl InstallationApp {
    fn new(settings: InstallationSettings) -> Self {
        Self {
            settings,
            orchestrator: None,
            windows: Vec::new(),
            window_index: HashMap::new(),
            next_redraw_at: Instant::now(),
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop, index: usize) -> Option<Arc<Window>> {
        let width = self.settings.window_width;
        let attributes = WindowAttributes::default()
            .with_title(format!("{} {}", WINDOW_TITLE, index + 1))
            .with_inner_size(PhysicalSize::new(width, self.settings.window_height))
            .with_position(PhysicalPosition::new(index as i32 * width as i32, 0));

        match event_loop.create_window(attributes) {
            Ok(window) => Some(Arc::new(window)),
            Err(e) => {
                tracing::error!("Failed to create window {}: {}", index, e);
                None
            }
        }
    }

    fn draw_window(&mut self, event_loop: &ActiveEventLoop, index: usize) {
        let Some(display) = self.windows.get_mut(index) else {
            return;
        };

        match display.draw() {
            Ok(_) => {}
            Err(RenderError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                tracing::warn!("Window {} surface lost, reconfiguring", index);
                display.reconfigure();
            }
            Err(RenderError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                tracing::error!("Out of GPU memory on window {}", index);
                event_loop.exit();
            }
            Err(e) => {
                tracing::warn!("Window {}: {}", index, e);
            }
        }
    }
}

impl ApplicationHandler for InstallationApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !self.windows.is_empty() {
            return;
        }

        tracing::info!("Creating {} windows...", self.settings.window_count);

        let mut orchestrator = FrameOrchestrator::from_settings(&self.settings);
        let shader_path = self.settings.asset_path(&self.settings.glitch_shader);

        for index in 0..self.settings.window_count {
            let Some(window) = self.create_window(event_loop, index) else {
                event_loop.exit();
                return;
            };

            // Window 0 paces the installation, so it waits for vsync
            let context = match pollster::block_on(WgpuContext::new(window.clone(), index == 0)) {
                Ok(context) => Some(context),
                Err(e) => {
                    tracing::error!("Window {}: {}. It will stay blank.", index, e);
                    None
                }
            };

            self.window_index.insert(window.id(), index);
            self.windows.push(DisplayWindow::new(
                index,
                window,
                context,
                orchestrator.snapshots(),
                shader_path.clone(),
                self.settings.glitch_gain,
            ));
        }

        orchestrator.setup();
        self.orchestrator = Some(orchestrator);

        tracing::info!("Press F to toggle fullscreen on a window, ESC to exit");
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(&index) = self.window_index.get(&window_id) else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match key_code {
                KeyCode::Escape => {
                    tracing::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
                KeyCode::KeyF => {
                    if let Some(display) = self.windows.get(index) {
                        display.toggle_fullscreen();
                    }
                }
                _ => {}
            },

            WindowEvent::Resized(size) => {
                if let Some(display) = self.windows.get_mut(index) {
                    display.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if index == 0 {
                    if let Some(orchestrator) = self.orchestrator.as_mut() {
                        orchestrator.update();
                    }
                }

                self.draw_window(event_loop, index);

                if index == 0 {
                    for display in self.windows.iter().skip(1) {
                        display.request_redraw();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(driver) = self.windows.first() else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        let frame_duration = Duration::from_nanos(1_000_000_000u64 / self.settings.target_fps.max(1) as u64);
        let now = Instant::now();

        if now >= self.next_redraw_at {
            driver.request_redraw();
            self.next_redraw_at += frame_duration;

            // Reset if too far behind
            if now > self.next_redraw_at + frame_duration * 2 {
                self.next_redraw_at = now + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_redraw_at));
    }
}

fn main() -> anyhow::Result<()> {
    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&LogConfig::from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Proximity Glitch v{}", env!("CARGO_PKG_VERSION"));

    let settings = InstallationSettings::load();
    tracing::info!(
        "{} windows at {}x{}, target {} fps, assets in {}",
        settings.window_count,
        settings.window_width,
        settings.window_height,
        settings.target_fps,
        settings.asset_root.display()
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = InstallationApp::new(settings);
    event_loop.run_app(&mut app).context("Event loop error")?;

    Ok(())
}
