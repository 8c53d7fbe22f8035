// =============================================================================
// FRAMELINE DEMO - spinning triangle on the frame-pipelined device
// =============================================================================
//
// FRAME FLOW:
// 1. begin_frame waits for the slot's fence and frees what that slot retired
// 2. Record a CommandList (one render pass scope)
// 3. submit + end_frame translate, submit and present
//
// Resizes go through Device::notify_resized; the swapchain and every
// swapchain render pass are rebuilt at the next frame boundary.
//
// Keys: ESC quits, F11 toggles fullscreen.
//
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use frameline::resource::{
    Buffer, Extent, GraphicsPipelineDesc, Pipeline, PushConstantRange, RenderPass, RenderPassDesc,
    RenderTarget, ShaderResult, ShaderStages, VertexAttribute, VertexFormat, VertexLayout,
};
use frameline::{CommandList, Config, Device, FrameStatus, VulkanBackend};

// Empty when glslc was not available at build time
const TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
const TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frameline demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {:?}, {} frames in flight",
        config.graphics.present_mode,
        config.graphics.frames_in_flight()
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Config filter first, RUST_LOG on top of it
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .parse_filters(&config.debug.log_filter)
        .parse_env("RUST_LOG")
        .init();
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex { position: [0.0, -0.6], color: [1.0, 0.3, 0.2] },
    Vertex { position: [0.55, 0.45], color: [0.2, 1.0, 0.4] },
    Vertex { position: [-0.55, 0.45], color: [0.3, 0.4, 1.0] },
];

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TrianglePush {
    angle: f32,
    aspect: f32,
}

/// GPU objects owned by the demo. Dropping them hands everything back to
/// the device for deferred destruction.
struct Scene {
    pass: RenderPass,
    triangle: Option<(Pipeline, Buffer)>,
}

impl Scene {
    fn new(device: &mut Device<VulkanBackend>, config: &Config) -> Result<Self> {
        let pass = device.create_render_pass(
            &RenderPassDesc::swapchain("main").with_clear_color(config.graphics.clear_color),
            RenderTarget::Swapchain,
        )?;

        if TRIANGLE_VERT.is_empty() || TRIANGLE_FRAG.is_empty() {
            log::warn!("Shaders were not compiled; only clearing the screen");
            return Ok(Self { pass, triangle: None });
        }

        let shader = ShaderResult::new()
            .with_stage(ShaderStages::VERTEX, TRIANGLE_VERT.to_vec())
            .with_stage(ShaderStages::FRAGMENT, TRIANGLE_FRAG.to_vec());
        let mut desc = GraphicsPipelineDesc::new("triangle", shader);
        desc.vertex_layout = Some(VertexLayout {
            stride: std::mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute { location: 0, format: VertexFormat::Vec2, offset: 0 },
                VertexAttribute { location: 1, format: VertexFormat::Vec3, offset: 8 },
            ],
        });
        desc.push_constants = Some(PushConstantRange {
            stages: ShaderStages::VERTEX,
            size: std::mem::size_of::<TrianglePush>() as u32,
        });

        let pipeline = device.create_graphics_pipeline(&desc, &pass)?;
        let vertices = device.create_vertex_buffer("triangle vertices", &VERTICES)?;

        Ok(Self {
            pass,
            triangle: Some((pipeline, vertices)),
        })
    }

    fn record(&self, list: &mut CommandList, extent: Extent, angle: f32) {
        list.begin();
        list.begin_render_pass(&self.pass);
        if let Some((pipeline, vertices)) = &self.triangle {
            let size = Vec2::new(extent.width as f32, extent.height as f32);
            list.set_viewport(Vec2::ZERO, size, 0.0, 1.0);
            list.set_scissor(Vec2::ZERO, size);
            list.bind_pipeline(pipeline);
            list.push_constants_value(
                ShaderStages::VERTEX,
                &TrianglePush {
                    angle,
                    aspect: size.x / size.y.max(1.0),
                },
            );
            list.bind_vertex_buffers(&[vertices]);
            list.draw(VERTICES.len() as u32, 0);
        }
        list.end_render_pass();
        list.end();
    }
}

struct App {
    config: Config,
    // Dropped before the device and the window
    scene: Option<Scene>,
    device: Option<Device<VulkanBackend>>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    extent: Extent,
    list: CommandList,

    started: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let extent = Extent::new(config.window.width, config.window.height);
        let now = Instant::now();
        Self {
            config,
            scene: None,
            device: None,
            window: None,
            is_fullscreen,
            extent,
            list: CommandList::new(),
            started: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_device(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        self.extent = Extent::new(size.width, size.height);

        let backend = VulkanBackend::new(
            &self.config.window.title,
            window.raw_display_handle(),
            window.raw_window_handle(),
            self.extent,
            &self.config.graphics,
            &self.config.debug,
        )
        .context("Failed to create Vulkan backend")?;
        let mut device = Device::new(backend, &self.config.graphics)?;
        self.scene = Some(Scene::new(&mut device, &self.config)?);
        self.device = Some(device);
        Ok(())
    }

    /// Returns whether a frame was actually presented.
    fn render_frame(&mut self) -> Result<bool> {
        let (Some(device), Some(scene)) = (self.device.as_mut(), self.scene.as_ref()) else {
            return Ok(false);
        };

        if let FrameStatus::Skipped = device.begin_frame()? {
            device.end_frame()?;
            return Ok(false);
        }

        let angle = self.started.elapsed().as_secs_f32();
        scene.record(&mut self.list, self.extent, angle);
        device.submit(&mut self.list)?;
        device.end_frame()?;
        Ok(true)
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        self.scene = None;
        if let Some(mut device) = self.device.take() {
            log::info!(
                "Shutting down after {} frames, {} resources still live",
                device.completed_frames(),
                device.live_resources()
            );
            if let Err(err) = device.shutdown() {
                log::error!("Shutdown failed: {:#}", err);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_device(&window) {
            log::error!("Failed to initialize device: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.extent = Extent::new(size.width, size.height);
                if let Some(device) = self.device.as_mut() {
                    device.notify_resized(self.extent);
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
