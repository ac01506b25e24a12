use anyhow::{Context, Result};
use clap::Parser;
use egui::Context as EguiContext;
use glam::{Vec2, Vec3};
use orrery_assets::AssetStore;
use orrery_render::gpu::{TargetDesc, TargetHandle, TextureDesc, TextureFormat};
use orrery_render::{
    DeferredRenderer, FrameStats, Gpu, OrbitCamera, OrbitView, Perspective, RenderContext, RendererConfig,
    TextureHandle,
};
use orrery_render_wgpu::{OrbitController, PanKey, WgpuGpu};
use orrery_scene::SceneModel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "orrery-desktop", about = "Orrery desktop viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Renderer config file (YAML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory searched for meshes, textures and shaders before the built-ins
    #[arg(long)]
    assets: Option<PathBuf>,
}

/// Scene, camera and UI state; everything that outlives the GPU objects.
struct AppState {
    scene: SceneModel,
    camera: OrbitCamera,
    controller: OrbitController,
    config: RendererConfig,
    store: AssetStore,
    paused: bool,
    show_panel: bool,
    screenshot_requested: bool,
    last_stats: FrameStats,
    frame_ms: f32,
    last_frame: Instant,
}

impl AppState {
    fn new(config: RendererConfig, store: AssetStore) -> Self {
        Self {
            scene: SceneModel::new(),
            camera: OrbitCamera::new(
                OrbitView::new(60.0, 30.0, 20.0, Vec3::new(0.0, 15.0, 0.0)),
                Perspective::new(60.0, 16.0 / 9.0, 0.1, 1000.0),
            ),
            controller: OrbitController::default(),
            config,
            store,
            paused: false,
            show_panel: true,
            screenshot_requested: false,
            last_stats: FrameStats::default(),
            frame_ms: 0.0,
            last_frame: Instant::now(),
        }
    }

    fn update(&mut self, dt: f32) {
        if !self.paused {
            self.scene.update(dt);
        }
        self.controller.update(dt, self.camera.view_mut());
        self.frame_ms = self.frame_ms * 0.9 + dt * 1000.0 * 0.1;
    }

    fn draw_ui(&mut self, ctx: &EguiContext, renderer: &mut DeferredRenderer) {
        if !self.show_panel {
            return;
        }

        egui::SidePanel::left("orrery")
            .default_width(240.0)
            .show(ctx, |ui| {
                ui.heading("Orrery");
                ui.separator();
                ui.label(format!("Frame: {:.1} ms", self.frame_ms));
                ui.label(format!("Tick: {}  Entities: {}", self.scene.tick(), self.scene.entity_count()));
                ui.label(format!(
                    "Draw calls: {}  Instances: {}",
                    self.last_stats.draw_calls, self.last_stats.instances
                ));
                ui.label(format!(
                    "Reflection capture: {}",
                    if self.last_stats.captured { "yes" } else { "no" }
                ));
                ui.separator();

                let mut bloom = renderer.bloom_enabled();
                if ui.checkbox(&mut bloom, "Bloom (Space)").changed() {
                    renderer.set_bloom(bloom);
                }
                ui.checkbox(&mut self.paused, "Pause motion (P)");
                if ui.button("Screenshot (F12)").clicked() {
                    self.screenshot_requested = true;
                }
                ui.separator();

                ui.heading("Camera");
                let view = self.camera.view_mut();
                let mut distance = view.distance();
                if ui
                    .add(egui::Slider::new(&mut distance, 2.0..=400.0).text("distance"))
                    .changed()
                {
                    view.set_distance(distance);
                }
                let mut elevation = view.elevation();
                if ui
                    .add(egui::Slider::new(&mut elevation, -89.0..=89.0).text("elevation"))
                    .changed()
                {
                    view.set_elevation(elevation);
                }
                ui.separator();

                ui.collapsing("Passes", |ui| {
                    for name in renderer.pass_names() {
                        ui.label(name);
                    }
                });
                ui.label(format!("Lights: {}", renderer.lights().len()));

                ui.separator();
                ui.small("F1: Panel | LMB drag: Rotate | Wheel: Zoom | WASD: Pan");
            });
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool, renderer: Option<&mut DeferredRenderer>) {
        let pan = match key {
            KeyCode::KeyW => Some(PanKey::Forward),
            KeyCode::KeyS => Some(PanKey::Backward),
            KeyCode::KeyA => Some(PanKey::Left),
            KeyCode::KeyD => Some(PanKey::Right),
            _ => None,
        };
        if let Some(pan) = pan {
            self.controller.set_key(pan, pressed);
            return;
        }
        if !pressed {
            return;
        }

        match key {
            KeyCode::Space => {
                if let Some(renderer) = renderer {
                    let enabled = !renderer.bloom_enabled();
                    renderer.set_bloom(enabled);
                    tracing::info!(enabled, "bloom toggled");
                }
            }
            KeyCode::F12 => self.screenshot_requested = true,
            KeyCode::F1 => self.show_panel = !self.show_panel,
            KeyCode::KeyP => self.paused = !self.paused,
            _ => {}
        }
    }
}

/// Offscreen image the renderer draws into; blitted to the surface each frame.
fn create_output(gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<(TextureHandle, TargetHandle)> {
    let texture = gpu.create_texture(&TextureDesc::d2("window", width, height, TextureFormat::Rgba8Unorm));
    let target = gpu
        .create_target(&TargetDesc {
            label: "window",
            colors: vec![texture.into()],
            depth: None,
        })
        .map_err(|reason| anyhow::anyhow!("window target incomplete: {reason}"))?;
    Ok((texture, target))
}

fn save_screenshot(gpu: &mut dyn Gpu, texture: TextureHandle) -> Result<PathBuf> {
    let frame = gpu.read_texture(texture, 0)?;
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let path = PathBuf::from(format!("orrery-{stamp}.png"));
    image::RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba8())
        .context("readback does not match its dimensions")?
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Window and device objects, created once the event loop resumes.
struct Graphics {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    gpu: WgpuGpu,
    renderer: DeferredRenderer,
    output: (TextureHandle, TargetHandle),
    egui_winit: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    /// Size to apply before the next frame.
    pending_resize: Option<(u32, u32)>,
}

impl Graphics {
    fn new(event_loop: &ActiveEventLoop, state: &mut AppState, egui_ctx: &EguiContext) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Orrery")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no compatible graphics adapter")?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("orrery_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let surface_caps = surface.get_capabilities(&adapter);
        // The renderer writes display-ready values; keep them as they are.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .context("surface reports no formats")?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);
        let mut gpu = WgpuGpu::new(device, queue);
        let renderer = DeferredRenderer::new(&mut gpu, &state.store, state.config.clone(), width, height)?;
        let output = create_output(&mut gpu, width, height)?;
        state.camera.projection_mut().set_aspect(width as f32 / height as f32);

        let egui_winit = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        tracing::info!(
            backend = adapter.get_info().backend.to_str(),
            format = ?surface_format,
            width,
            height,
            "GPU initialized"
        );

        Ok(Self {
            window,
            surface,
            surface_config,
            gpu,
            renderer,
            output,
            egui_winit,
            egui_renderer,
            pending_resize: None,
        })
    }

    fn apply_resize(&mut self, state: &mut AppState) -> Result<()> {
        let Some((width, height)) = self.pending_resize.take() else {
            return Ok(());
        };
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(self.gpu.device(), &self.surface_config);

        self.renderer.resize(&mut self.gpu, width, height)?;
        let (texture, target) = self.output;
        self.gpu.release_target(target);
        self.gpu.release_texture(texture);
        self.output = create_output(&mut self.gpu, width, height)?;
        state.camera.projection_mut().set_aspect(width as f32 / height as f32);
        tracing::debug!(width, height, "window resized");
        Ok(())
    }

    fn frame(&mut self, state: &mut AppState, egui_ctx: &EguiContext) -> Result<()> {
        self.apply_resize(state)?;

        let output = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(self.gpu.device(), &self.surface_config);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let entities = state.scene.view_entities();
        {
            let mut ctx = RenderContext::with_output(&mut self.gpu, self.output.1)?;
            state.last_stats = self.renderer.render(&mut ctx, &state.camera, &entities)?;
        }
        if std::mem::take(&mut state.screenshot_requested) {
            match save_screenshot(&mut self.gpu, self.output.0) {
                Ok(path) => tracing::info!(path = %path.display(), "screenshot saved"),
                Err(e) => tracing::error!("screenshot failed: {e:#}"),
            }
        }
        self.gpu.present_to(self.output.0, &view, self.surface_config.format);
        self.gpu.flush();

        let raw_input = self.egui_winit.take_egui_input(&self.window);
        let full_output = egui_ctx.run(raw_input, |ctx| {
            state.draw_ui(ctx, &mut self.renderer);
        });
        self.egui_winit
            .handle_platform_output(&self.window, full_output.platform_output);
        let paint_jobs = egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.surface_config.width, self.surface_config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        let (device, queue) = (self.gpu.device(), self.gpu.queue());
        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(device, queue, *id, image_delta);
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("egui_encoder"),
        });
        self.egui_renderer
            .update_buffers(device, queue, &mut encoder, &paint_jobs, &screen_descriptor);
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            self.egui_renderer.render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        queue.submit(std::iter::once(encoder.finish()));
        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        output.present();
        Ok(())
    }
}

struct GpuApp {
    state: AppState,
    graphics: Option<Graphics>,
    egui_ctx: EguiContext,
}

impl GpuApp {
    fn new(state: AppState) -> Self {
        Self {
            state,
            graphics: None,
            egui_ctx: EguiContext::default(),
        }
    }
}

impl ApplicationHandler for GpuApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.graphics.is_some() {
            return;
        }
        match Graphics::new(event_loop, &mut self.state, &self.egui_ctx) {
            Ok(graphics) => self.graphics = Some(graphics),
            Err(e) => {
                tracing::error!("failed to initialize graphics: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(graphics) = &mut self.graphics else {
            return;
        };
        if graphics.egui_winit.on_window_event(&graphics.window, &event).consumed {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                // Minimized windows report zero; keep the last surfaces.
                if new_size.width > 0 && new_size.height > 0 {
                    graphics.pending_resize = Some((new_size.width, new_size.height));
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        ..
                    },
                ..
            } => {
                if key == KeyCode::Escape {
                    event_loop.exit();
                    return;
                }
                self.state
                    .handle_key(key, key_state == ElementState::Pressed, Some(&mut graphics.renderer));
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state: button_state,
                ..
            } => {
                self.state
                    .controller
                    .set_dragging(button_state == ElementState::Pressed);
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                self.state
                    .controller
                    .cursor_moved(position, self.state.camera.view_mut());
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                self.state.controller.scroll(lines, self.state.camera.view_mut());
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.state.last_frame).as_secs_f32().min(0.1);
                self.state.last_frame = now;
                self.state.update(dt);

                if let Err(e) = graphics.frame(&mut self.state, &self.egui_ctx) {
                    tracing::error!("frame failed: {e:#}");
                }
                graphics.window.request_redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(graphics) = &self.graphics {
            graphics.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut graphics) = self.graphics.take() {
            let (texture, target) = graphics.output;
            graphics.renderer.release(&mut graphics.gpu);
            graphics.gpu.release_target(target);
            graphics.gpu.release_texture(texture);
            tracing::debug!(stats = ?graphics.gpu.stats(), "graphics released");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("orrery-desktop starting");

    let config = match &cli.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    let mut store = AssetStore::with_builtins();
    if let Some(root) = cli.assets {
        store = store.with_root(root);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GpuApp::new(AppState::new(config, store));
    event_loop.run_app(&mut app)?;

    Ok(())
}
