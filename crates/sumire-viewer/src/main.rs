// Sumire viewer: opens a window, animates a ring of point lights and drives
// the renderer frame loop with the shadow mapper phases at their insertion
// points.
//
// Keys: V toggles vsync, Escape quits.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use sumire_renderer::scene::camera::{DEFAULT_FAR, DEFAULT_FOVY_DEGREES, DEFAULT_NEAR};
use sumire_renderer::scene::LightId;
use sumire_renderer::shadow::{LightMaskStats, ShadowDebugView};
use sumire_renderer::{
    Camera, HighQualityShadowMapper, Light, LightRegistry, RenderError, RenderResult, Renderer, RendererConfig,
    SumiWindow, WindowProvider,
};

const RING_RADIUS: f32 = 18.0;
const RING_CENTER: Vec3 = Vec3::new(0.0, 0.0, -25.0);
const LIGHT_RANGE: f32 = 4.0;

/// Everything that exists once the window does.
struct ViewerState {
    renderer: Renderer<SumiWindow>,
    mapper: HighQualityShadowMapper,
    camera: Camera,
    lights: LightRegistry,
    light_ids: Vec<LightId>,
}

impl ViewerState {
    fn new(window: Arc<Window>, config: &RendererConfig) -> RenderResult<Self> {
        let renderer = Renderer::new(SumiWindow::new(window), config)?;
        let extent = renderer.extent();

        // SAFETY: the mapper is destroyed in `shutdown` before the renderer
        // that owns the device and allocator.
        let mapper = unsafe {
            HighQualityShadowMapper::new(
                renderer.context(),
                renderer.memory(),
                extent.width,
                extent.height,
                renderer.shadow_inputs(),
                renderer.global_set_layout(),
                &config.shader_dir,
            )?
        };

        let mut camera = Camera::perspective(
            DEFAULT_FOVY_DEGREES.to_radians(),
            renderer.aspect_ratio(),
            DEFAULT_NEAR,
            DEFAULT_FAR,
        );
        camera.set_view_target(Vec3::new(0.0, 6.0, 10.0), RING_CENTER, Vec3::Y);

        let mut lights = LightRegistry::new();
        let light_ids = (0..config.max_lights)
            .map(|_| {
                let mut light = Light::point(RING_CENTER, LIGHT_RANGE);
                light.name = "Ring Light".to_string();
                lights.insert(light)
            })
            .collect();

        log::info!("Viewer started with {} lights", config.max_lights);

        Ok(Self {
            renderer,
            mapper,
            camera,
            lights,
            light_ids,
        })
    }

    fn animate_lights(&mut self, time: f32) {
        let count = self.light_ids.len().max(1) as f32;
        for (i, &id) in self.light_ids.iter().enumerate() {
            let Some(light) = self.lights.get_mut(id) else {
                continue;
            };
            let phase = i as f32 / count * TAU;
            let angle = phase + time * 0.3;
            // Stack lights into a few rings of different radii.
            let radius = RING_RADIUS * (0.4 + 0.6 * ((i % 4) as f32 + 1.0) / 4.0);
            light.translation = RING_CENTER
                + Vec3::new(angle.cos() * radius, 1.0 + (time + phase * 3.0).sin(), angle.sin() * radius);
        }
    }

    /// Follow a swapchain rebuild with the camera aspect and shadow buffers.
    fn handle_recreation(&mut self) -> RenderResult<()> {
        if !self.renderer.take_recreated_flag() {
            return Ok(());
        }

        let extent = self.renderer.extent();
        self.camera.set_aspect(self.renderer.aspect_ratio());

        // SAFETY: recreation leaves the device idle.
        unsafe {
            self.mapper.update_screen_bounds(
                self.renderer.memory(),
                extent.width,
                extent.height,
                self.renderer.shadow_inputs(),
            )
        }
    }

    fn render_frame(&mut self, time: f32, debug_view: ShadowDebugView) -> RenderResult<()> {
        self.animate_lights(time);

        let frame = self.renderer.begin_frame()?;
        self.handle_recreation()?;
        let Some(mut frame) = frame else {
            return Ok(());
        };

        let mapper = &mut self.mapper;
        let renderer = &mut self.renderer;
        let frame_index = frame.frame_index;
        let lights = self.lights.lights();

        renderer.update_globals(&frame, &self.camera, lights)?;

        // Phase 1 runs on the CPU before any of this frame's work is submitted.
        mapper.prepare(frame_index, lights, &self.camera)?;
        if debug_view == ShadowDebugView::LightCount {
            let stats = LightMaskStats::from_mask(mapper.light_mask());
            log::trace!(
                "Light mask: max {} per tile, mean {:.2}, {} empty tiles",
                stats.max,
                stats.mean,
                stats.empty_tiles
            );
        }

        renderer.begin_gbuffer_render_pass(&mut frame);
        renderer.end_gbuffer_render_pass(&mut frame);

        renderer.begin_early_compute(&mut frame);
        // SAFETY: recordings are open and the mapper's inputs match the
        // renderer's current targets.
        unsafe {
            mapper.find_lights_approximate(
                &mut frame.early_compute,
                frame_index,
                self.camera.near(),
                self.camera.far(),
            );
            mapper.find_lights_accurate(&mut frame.early_compute, frame_index);
        }
        renderer.end_early_compute(&mut frame);

        renderer.begin_scene_render_pass(&mut frame);
        renderer.next_subpass(&mut frame)?;
        renderer.end_scene_render_pass(&mut frame);

        renderer.begin_late_compute(&mut frame);
        let global_set = renderer.global_descriptor_set(&frame);
        unsafe {
            mapper.generate_deferred_shadows(&mut frame.late_compute, frame_index, global_set);
        }
        renderer.end_late_compute(&mut frame);

        renderer.begin_composite_render_pass(&mut frame);
        renderer.end_composite_render_pass(&mut frame);

        renderer.end_frame(frame)?;
        self.handle_recreation()
    }

    fn shutdown(self) {
        if let Err(e) = self.renderer.wait_idle() {
            log::warn!("Device wait failed during shutdown: {e}");
        }
        // SAFETY: the device is idle and the allocator is still alive.
        unsafe { self.mapper.destroy(self.renderer.memory()) };
    }
}

struct ViewerApp {
    config: RendererConfig,
    state: Option<ViewerState>,
    start: Instant,
    failed: bool,
}

impl ViewerApp {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            state: None,
            start: Instant::now(),
            failed: false,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: RenderError) {
        log::error!("{error}");
        self.failed = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Sumire")
            .with_inner_size(PhysicalSize::new(self.config.startup_width, self.config.startup_height));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, RenderError::Window(e.to_string())),
        };

        match ViewerState::new(window, &self.config) {
            Ok(state) => self.state = Some(state),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(_) => {
                state.renderer.window().mark_resized();
            }

            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed && !event.repeat => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                    PhysicalKey::Code(KeyCode::KeyV) => {
                        let vsync = !state.renderer.vsync();
                        state.renderer.set_vsync(vsync);
                    }
                    _ => {}
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let time = self.start.elapsed().as_secs_f32();
        let debug_view = self.config.debug_view;

        let Some(state) = self.state.as_mut() else {
            return;
        };

        // Nothing to draw into while minimized.
        let extent = state.renderer.window().extent();
        if extent.width == 0 || extent.height == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            return;
        }

        if let Err(e) = state.render_frame(time, debug_view) {
            self.fail(event_loop, e);
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            state.shutdown();
        }
    }
}

fn main() {
    pretty_env_logger::init();

    let config = RendererConfig::from_env();
    log::debug!("{config:?}");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {e}");
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop terminated: {e}");
        std::process::exit(1);
    }

    if app.failed {
        std::process::exit(1);
    }
}
