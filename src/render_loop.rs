use anyhow::Context;
use winit::{
    event::{ElementState, KeyboardInput, MouseButton, VirtualKeyCode, WindowEvent},
    window::Window,
};

use crate::config::GridConfig;
use crate::hit::{Footprint, GpuLocator, GridHitTester};
use crate::input::{PointerEvent, PointerTracker};
use crate::instances::InstanceRenderer;
use crate::scene::Scene;

pub struct RenderLoop {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: winit::dpi::PhysicalSize<u32>,

    scene: Scene,
    instances: InstanceRenderer,
    hit_tester: GridHitTester,
    pointer: PointerTracker,
}

impl RenderLoop {
    pub async fn new(window: &Window, grid: GridConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::Backends::all());
        let surface = unsafe { instance.create_surface(window) };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
                power_preference: wgpu::PowerPreference::HighPerformance,
            })
            .await
            .context("no graphics adapter can present to this window")?;
        log::info!("adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    label: None,
                    limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to open the graphics device")?;

        let format = surface
            .get_preferred_format(&adapter)
            .context("surface reports no usable texture format")?;
        log::info!("surface format: {:?}", format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
        };
        if size.width > 0 && size.height > 0 {
            surface.configure(&device, &config);
        }

        log::info!(
            "grid: {}x{} cells, {} levels",
            grid.columns,
            grid.rows,
            grid.levels
        );
        let pointer = PointerTracker::new(grid.tap_slop);
        let scene = Scene::new(grid, size.width as f32, size.height as f32);
        let instances = InstanceRenderer::new(&device, &queue, format, scene.cells());
        let hit_tester = GridHitTester::new(&device);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            scene,
            instances,
            hit_tester,
            pointer,
        })
    }

    pub fn input(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(physical_size) => {
                self.size = *physical_size;
                self.resize();
            }
            WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                self.size = **new_inner_size;
                self.resize();
            }

            WindowEvent::CursorMoved { position, .. } => {
                let position = glam::vec2(position.x as f32, position.y as f32);
                if let Some(event) = self.pointer.moved(position) {
                    self.dispatch_pointer(event);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.pointer.pressed(),
                ElementState::Released => {
                    if let Some(event) = self.pointer.released() {
                        self.dispatch_pointer(event);
                    }
                }
            },

            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Pressed,
                        virtual_keycode: Some(key),
                        ..
                    },
                ..
            } => self.key_pressed(*key),

            _ => {}
        }
    }

    fn key_pressed(&mut self, key: VirtualKeyCode) {
        match key {
            VirtualKeyCode::Space => {
                self.scene.toggle_explode();
                log::info!("explode {}", if self.scene.is_exploding() { "on" } else { "off" });
            }
            VirtualKeyCode::R => self.reset(),
            VirtualKeyCode::C => self.scene.clear_levels(),
            VirtualKeyCode::Plus | VirtualKeyCode::Equals | VirtualKeyCode::NumpadAdd => {
                self.scene.set_level_max(self.scene.level_max() + 1);
            }
            VirtualKeyCode::Minus | VirtualKeyCode::NumpadSubtract => {
                if self.scene.level_max() > 1 {
                    self.scene.set_level_max(self.scene.level_max() - 1);
                }
            }
            _ => {}
        }
    }

    fn dispatch_pointer(&mut self, event: PointerEvent) {
        let mut locator = GpuLocator {
            device: &self.device,
            queue: &self.queue,
            tester: &self.hit_tester,
            instances: self.instances.buffer(),
            count: self.instances.len() as u32,
            footprint: Footprint::new(self.scene.config().cell_size(), self.scene.config().extent()),
        };
        self.scene.handle_pointer(event, &mut locator);
    }

    /// Drives pending GPU callbacks and applies every hit that has landed.
    pub fn update(&mut self) {
        self.device.poll(wgpu::Maintain::Poll);
        let taps = self.scene.resolve_hits();
        if taps > 0 {
            log::trace!("{} taps applied, {} pending", taps, self.scene.pending_hits());
        }
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        self.scene
            .encode_frame(&mut self.instances, &self.queue, &mut encoder, &view);
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        self.instances.frame_submitted();

        Ok(())
    }

    pub fn resize(&mut self) {
        if self.size.width == 0 || self.size.height == 0 {
            return;
        }
        self.config.width = self.size.width;
        self.config.height = self.size.height;
        self.surface.configure(&self.device, &self.config);
        self.scene
            .resize(self.size.width as f32, self.size.height as f32);
    }

    pub fn reset(&mut self) {
        self.scene.reset();
        self.instances
            .reallocate(&self.device, &self.queue, self.scene.cells());
    }
}
