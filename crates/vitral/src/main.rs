use clap::Parser;
use log::*;
use winit::{dpi::LogicalSize, event::*, event_loop::*, window::WindowBuilder};

pub mod app;
pub mod cli;
pub mod graphics;
pub mod profiling;
pub mod report;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn main() -> ! {
    pretty_env_logger::formatted_builder()
        .format_indent(None)
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .filter_module("wgpu_hal", LevelFilter::Off)
        .filter_module("wgpu_core", LevelFilter::Error)
        .filter_module("naga", LevelFilter::Off)
        .init();

    let args = cli::Args::parse();

    info!("Welcome to Vitral {VERSION}");

    let eloop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Vitral")
        .with_inner_size(LogicalSize::new(args.width, args.height))
        .with_resizable(false)
        .build(&eloop)
        .expect("couldn't create main window");

    let mut app = app::App::new(&args, &window);

    // The main thread gets hijacked as the windowing and render thread
    eloop.run(move |event, _, flow| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                flow.set_exit();
            }

            WindowEvent::ScaleFactorChanged { .. } => {}

            event => {
                if let Some(event) = event.to_static() {
                    app.push_event(event);
                }
            }
        },

        // Fires once per loop iteration under the default Poll control flow, which
        // makes it the frame tick.
        Event::MainEventsCleared => match app.frame() {
            Ok(true) => {}
            Ok(false) => flow.set_exit(),
            Err(error) => {
                error!("Fatal error during the frame: {error:#}");
                flow.set_exit_with_code(1);
            }
        },

        Event::LoopDestroyed => {
            trace!("Shutting down the event loop");
        }

        _ => {}
    });
}
