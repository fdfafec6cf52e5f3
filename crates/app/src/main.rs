//! vkr demo.
//!
//! Opens a window and renders a spinning static triangle next to a dynamic
//! triangle whose vertices are rewritten every frame.

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkr_core::{FrameClock, RendererConfig};
use vkr_platform::{ShaderLibrary, ShaderStage, Surface, Window};
use vkr_rhi::Vertex;
use vkr_rhi::vulkan::{Device, Instance, VulkanDevice, select_physical_device};
use vkr_scene::{FrameStatus, MeshId, ModelId, SceneRenderer, SwapchainPresenter};

const CONFIG_PATH: &str = "vkr.toml";

/// Vulkan objects tied to the window.
struct RenderState {
    // Field order is drop order: the renderer idles the device and releases
    // the swapchain before the surface and instance go away.
    renderer: SceneRenderer<VulkanDevice, SwapchainPresenter>,
    spinner: ModelId,
    wave: MeshId,
    _surface: Surface,
    _instance: Instance,
}

impl RenderState {
    fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(c"vkr", &extensions, config.enable_validation)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device = select_physical_device(
            instance.handle(),
            surface.handle(),
            &instance.surface_loader(),
        )?;
        let device = Device::new(&instance, &physical_device)?;
        let device = Arc::new(VulkanDevice::new(&instance, device)?);

        let extent = window.extent();
        let presenter = SwapchainPresenter::new(
            &instance,
            Arc::clone(&device),
            surface.handle(),
            extent,
            config.present_mode,
        )?;
        let mut renderer = SceneRenderer::new(device, presenter, config, extent)?;

        let shaders = ShaderLibrary::new(&config.shaders);
        let material = renderer.create_material(
            &shaders.binary(ShaderStage::Vertex)?,
            &shaders.binary(ShaderStage::Fragment)?,
        )?;

        let triangle = renderer.create_static_mesh(&[
            Vertex::new(-0.5, -0.5, 0.0),
            Vertex::new(0.5, -0.5, 0.0),
            Vertex::new(0.0, 0.5, 0.0),
        ])?;
        let spinner = renderer.create_model(
            triangle,
            material,
            Mat4::from_translation(Vec3::new(-0.8, 0.0, 0.0)),
        )?;

        let wave = renderer.create_dynamic_mesh(3)?;
        renderer.update_dynamic_mesh(wave, &wave_vertices(0.0))?;
        renderer.create_model(
            wave,
            material,
            Mat4::from_translation(Vec3::new(0.8, 0.0, 0.0)),
        )?;

        info!("Scene ready: {} models", renderer.model_count());
        Ok(Self {
            renderer,
            spinner,
            wave,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Animates the scene for time `t` in seconds.
    fn update(&mut self, t: f32) -> Result<()> {
        self.renderer.update_dynamic_mesh(self.wave, &wave_vertices(t))?;
        self.renderer.set_model_transform(
            self.spinner,
            Mat4::from_translation(Vec3::new(-0.8, 0.0, 0.0)) * Mat4::from_rotation_y(t),
        )?;
        Ok(())
    }
}

fn wave_vertices(t: f32) -> [Vertex; 3] {
    let lift = 0.25 * t.sin();
    [
        Vertex::new(-0.5, -0.5, 0.0),
        Vertex::new(0.5, -0.5, 0.0),
        Vertex::new(0.25 * (t * 0.7).cos(), 0.5 + lift, 0.0),
    ]
}

struct App {
    config: RendererConfig,
    state: Option<RenderState>,
    window: Option<Window>,
    clock: FrameClock,
    needs_resize: bool,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            state: None,
            window: None,
            clock: FrameClock::new(),
            needs_resize: false,
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(state)) = (&self.window, &mut self.state) else {
            return;
        };
        let (width, height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            // Minimized: nothing to present to.
            return;
        }

        if self.needs_resize {
            if let Err(e) = state.renderer.resize(width, height) {
                error!("Failed to resize swapchain: {}", e);
                event_loop.exit();
                return;
            }
            self.needs_resize = false;
        }

        self.clock.begin_frame();
        if let Err(e) = state.update(self.clock.elapsed_secs()) {
            error!("Failed to update scene: {:?}", e);
            event_loop.exit();
            return;
        }

        match state.renderer.render_frame() {
            Ok(FrameStatus::Presented) => {}
            Ok(FrameStatus::Suboptimal) => self.needs_resize = true,
            Err(e) if e.is_out_of_date() => {
                warn!("Swapchain out of date, recreating");
                self.needs_resize = true;
            }
            Err(e) => {
                error!("Render error: {}", e);
                event_loop.exit();
                return;
            }
        }

        if self.clock.frame_count().is_multiple_of(600) {
            info!("{:.1} fps", self.clock.average_fps());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match RenderState::new(&window, &self.config) {
            Ok(state) => {
                info!("Initialization complete, entering main loop");
                self.state = Some(state);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to create renderer: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                // Tear down while the window is still alive.
                self.state = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                self.needs_resize = true;
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    vkr_core::init_logging();
    info!("Starting vkr");

    let config = RendererConfig::load_or_default(CONFIG_PATH)
        .with_context(|| format!("Failed to load {}", CONFIG_PATH))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
