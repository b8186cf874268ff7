//! wgpu implementation of [`RenderBackend`]
//!
//! One instance per window: its own surface, device and queue, so nothing
//! created here is ever visible to another window.

use std::path::Path;
use std::sync::Arc;

use winit::window::Window;

use super::{Composite, FramePlan, GpuResource, RenderBackend, RenderError, Viewport};
use crate::detection::DetectionCandidate;
use crate::frame::PixelFrame;

/// Format of every sampled texture and offscreen framebuffer
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

const MAX_OVERLAYS: usize = 64;

/// Outline width in framebuffer pixels
const OVERLAY_LINE_WIDTH: f32 = 2.0;

const OVERLAY_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x2];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct OverlayInstance {
    /// left, top, right, bottom in clip space
    rect: [f32; 4],
    thickness: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GlitchParams {
    intensity: f32,
    time: f32,
    _pad: [f32; 2],
}

/// Compiled glitch pipeline
pub struct GlitchShader {
    pipeline: wgpu::RenderPipeline,
}

/// Offscreen render target, sampled when compositing
pub struct Framebuffer {
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    glitch_bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl GpuResource for Framebuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// RGBA source texture with its sampling bind group
pub struct SourceTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl GpuResource for SourceTexture {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Rendering context of a single window
pub struct WgpuContext {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,

    sampler: wgpu::Sampler,
    texture_layout: wgpu::BindGroupLayout,
    glitch_layout: wgpu::BindGroupLayout,
    glitch_pipeline_layout: wgpu::PipelineLayout,
    glitch_params: wgpu::Buffer,

    blit_to_framebuffer: wgpu::RenderPipeline,
    blit_to_surface: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    overlay_buffer: wgpu::Buffer,

    egui_ctx: egui::Context,
    egui_renderer: egui_wgpu::Renderer,
}

impl WgpuContext {
    /// Create a context for `window`. `vsync` selects Fifo presentation,
    /// otherwise the lowest-latency mode the surface supports.
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::Init(format!("surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::Init("no suitable GPU adapter".to_string()))?;

        tracing::info!(
            "Window {:?}: using GPU {} ({:?})",
            window.id(),
            adapter.get_info().name,
            adapter.get_info().backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Display Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Init(format!("device: {}", e)))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::Init("surface reports no formats".to_string()))?;

        let present_mode = if vsync {
            wgpu::PresentMode::Fifo
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        tracing::debug!("Surface format {:?}, present mode {:?}", surface_format, present_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Bind Group Layout"),
            entries: &[texture_entry, sampler_entry],
        });

        let glitch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Glitch Bind Group Layout"),
            entries: &[
                texture_entry,
                sampler_entry,
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let blit_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&texture_layout],
            push_constant_ranges: &[],
        });
        let glitch_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Glitch Pipeline Layout"),
            bind_group_layouts: &[&glitch_layout],
            push_constant_ranges: &[],
        });

        let glitch_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Glitch Params Buffer"),
            size: std::mem::size_of::<GlitchParams>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });
        let blit_to_framebuffer =
            fullscreen_pipeline(&device, "Blit To Framebuffer", &blit_layout, &blit_shader, TEXTURE_FORMAT);
        let blit_to_surface =
            fullscreen_pipeline(&device, "Blit To Surface", &blit_layout, &blit_shader, surface_format);

        let overlay_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Overlay Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/overlay.wgsl").into()),
        });
        let overlay_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Overlay Pipeline Layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
        let overlay_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Overlay Pipeline"),
            layout: Some(&overlay_layout),
            vertex: wgpu::VertexState {
                module: &overlay_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<OverlayInstance>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &OVERLAY_ATTRIBUTES,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &overlay_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let overlay_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Overlay Instance Buffer"),
            size: (std::mem::size_of::<OverlayInstance>() * MAX_OVERLAYS) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let egui_ctx = egui::Context::default();
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            sampler,
            texture_layout,
            glitch_layout,
            glitch_pipeline_layout,
            glitch_params,
            blit_to_framebuffer,
            blit_to_surface,
            overlay_pipeline,
            overlay_buffer,
            egui_ctx,
            egui_renderer,
        })
    }

    /// Reconfigure the surface; zero sizes are ignored until the window reappears
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reconfigure with the current size after the surface was lost
    pub fn reconfigure(&mut self) {
        let size = self.window.inner_size();
        self.resize(size.width, size.height);
    }

    /// Clear the window to black with a few lines of text, before any frame is ready
    pub fn present_idle(&mut self, lines: &[String]) -> Result<(), RenderError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Idle Encoder"),
        });

        {
            let _pass = begin_pass(&mut encoder, "Idle Clear Pass", &view, wgpu::LoadOp::Clear(wgpu::Color::BLACK));
        }
        if !lines.is_empty() {
            self.paint_text(&mut encoder, &view, lines);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn paint_text(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, lines: &[String]) {
        let (width, height) = (self.config.width, self.config.height);
        let raw_input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(width as f32, height as f32),
            )),
            ..Default::default()
        };

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            let painter = ctx.layer_painter(egui::LayerId::new(egui::Order::Foreground, egui::Id::new("debug_text")));
            for (i, line) in lines.iter().enumerate() {
                painter.text(
                    egui::pos2(20.0, 20.0 + 20.0 * i as f32),
                    egui::Align2::LEFT_TOP,
                    line,
                    egui::FontId::monospace(14.0),
                    egui::Color32::WHITE,
                );
            }
        });

        let paint_jobs = self.egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);
        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: full_output.pixels_per_point,
        };
        self.egui_renderer
            .update_buffers(&self.device, &self.queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let mut pass = begin_pass(encoder, "Debug Text Pass", view, wgpu::LoadOp::Load).forget_lifetime();
            self.egui_renderer.render(&mut pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

impl RenderBackend for WgpuContext {
    type Shader = GlitchShader;
    type Framebuffer = Framebuffer;
    type Texture = SourceTexture;

    fn surface_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn compile_shader(&mut self, path: &Path) -> Result<GlitchShader, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|source| RenderError::ShaderIo {
            path: path.to_path_buf(),
            source,
        })?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Glitch Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = fullscreen_pipeline(
            &self.device,
            "Glitch Pipeline",
            &self.glitch_pipeline_layout,
            &module,
            self.config.format,
        );

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompile {
                path: path.to_path_buf(),
                message: error.to_string(),
            });
        }

        Ok(GlitchShader { pipeline })
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::ZeroSized("framebuffer"));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Framebuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Framebuffer Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let glitch_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Glitch Bind Group"),
            layout: &self.glitch_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.glitch_params.as_entire_binding(),
                },
            ],
        });

        tracing::info!("Allocated framebuffer for window {:?}: {}x{}", self.window.id(), width, height);

        Ok(Framebuffer {
            view,
            bind_group,
            glitch_bind_group,
            width,
            height,
        })
    }

    fn create_texture(&mut self, width: u32, height: u32) -> SourceTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Source Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Source Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        SourceTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }

    fn upload(&mut self, texture: &SourceTexture, frame: &PixelFrame) {
        if !frame.is_valid() || (frame.width, frame.height) != (texture.width, texture.height) {
            tracing::debug!(
                "Skipping upload of {}x{} frame into {}x{} texture",
                frame.width,
                frame.height,
                texture.width,
                texture.height
            );
            return;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride() as u32),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn render(&mut self, plan: FramePlan<'_, Self>) -> Result<(), RenderError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        let instances = overlay_instances(plan.overlays, plan.framebuffer.size());
        if !instances.is_empty() {
            self.queue
                .write_buffer(&self.overlay_buffer, 0, bytemuck::cast_slice(&instances));
        }

        // Source and overlays into the framebuffer
        {
            let mut pass = begin_pass(
                &mut encoder,
                "Framebuffer Pass",
                &plan.framebuffer.view,
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            );
            if let Some(texture) = plan.content {
                pass.set_pipeline(&self.blit_to_framebuffer);
                pass.set_bind_group(0, &texture.bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            if !instances.is_empty() {
                pass.set_pipeline(&self.overlay_pipeline);
                pass.set_vertex_buffer(0, self.overlay_buffer.slice(..));
                pass.draw(0..24, 0..instances.len() as u32);
            }
        }

        if let Composite::Glitch { intensity, time, .. } = plan.composite {
            let params = GlitchParams {
                intensity,
                time,
                _pad: [0.0; 2],
            };
            self.queue
                .write_buffer(&self.glitch_params, 0, bytemuck::bytes_of(&params));
        }

        // Framebuffer onto the surface
        {
            let mut pass = begin_pass(&mut encoder, "Composite Pass", &view, wgpu::LoadOp::Clear(wgpu::Color::BLACK));
            match plan.composite {
                Composite::Glitch { shader, .. } => {
                    pass.set_pipeline(&shader.pipeline);
                    pass.set_bind_group(0, &plan.framebuffer.glitch_bind_group, &[]);
                }
                Composite::Letterbox(viewport) => {
                    if let Some(vp) = clamp_viewport(viewport, (self.config.width, self.config.height)) {
                        pass.set_viewport(vp.x, vp.y, vp.width, vp.height, 0.0, 1.0);
                    }
                    pass.set_pipeline(&self.blit_to_surface);
                    pass.set_bind_group(0, &plan.framebuffer.bind_group, &[]);
                }
                Composite::Fullscreen => {
                    pass.set_pipeline(&self.blit_to_surface);
                    pass.set_bind_group(0, &plan.framebuffer.bind_group, &[]);
                }
            }
            pass.draw(0..3, 0..1);
        }

        if !plan.debug_text.is_empty() {
            self.paint_text(&mut encoder, &view, plan.debug_text);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Pixel rectangles to clip-space outline instances
fn overlay_instances(overlays: &[DetectionCandidate], target: (u32, u32)) -> Vec<OverlayInstance> {
    let (w, h) = (target.0 as f32, target.1 as f32);
    if w <= 0.0 || h <= 0.0 {
        return Vec::new();
    }

    overlays
        .iter()
        .take(MAX_OVERLAYS)
        .map(|r| OverlayInstance {
            rect: [
                r.x / w * 2.0 - 1.0,
                1.0 - r.y / h * 2.0,
                (r.x + r.width) / w * 2.0 - 1.0,
                1.0 - (r.y + r.height) / h * 2.0,
            ],
            thickness: [OVERLAY_LINE_WIDTH * 2.0 / w, OVERLAY_LINE_WIDTH * 2.0 / h],
        })
        .collect()
}

/// Restrict a viewport to the surface; `None` when nothing visible remains
fn clamp_viewport(vp: Viewport, surface: (u32, u32)) -> Option<Viewport> {
    let (sw, sh) = (surface.0 as f32, surface.1 as f32);
    let x = vp.x.clamp(0.0, sw);
    let y = vp.y.clamp(0.0, sh);
    let width = (vp.x + vp.width).min(sw) - x;
    let height = (vp.y + vp.height).min(sh) - y;
    if width < 1.0 || height < 1.0 {
        return None;
    }
    Some(Viewport { x, y, width, height })
}
