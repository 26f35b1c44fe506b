use anyhow::Context;
use config::GridConfig;
use render_loop::RenderLoop;
use winit::{
    dpi::{PhysicalPosition, PhysicalSize},
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

mod cell;
mod config;
mod coords;
mod hit;
mod input;
mod instances;
mod interpolator;
mod render_loop;
mod scene;
#[cfg(test)]
mod shader_tests;

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Grid Draw")
        .with_position(PhysicalPosition::<u32>::new(0, 0))
        .with_inner_size(PhysicalSize::<u32>::new(1000, 1000))
        .build(&event_loop)
        .context("failed to create the window")?;

    let mut render_loop = RenderLoop::new(&window, GridConfig::from_env()).await?;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => {
                render_loop.input(event);
                if let WindowEvent::CloseRequested = event {
                    *control_flow = ControlFlow::Exit;
                }
            }

            Event::MainEventsCleared => {
                render_loop.update();
                match render_loop.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => render_loop.resize(),
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("surface out of memory, exiting");
                        *control_flow = ControlFlow::Exit;
                    }
                    Err(e) => log::warn!("frame skipped: {:?}", e),
                }
                window.request_redraw()
            }

            _ => {}
        }
    });
}
