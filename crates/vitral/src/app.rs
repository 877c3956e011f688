use crate::{
    cli::Args,
    graphics::{DeviceContext, Scene, SceneRenderer},
    profiling::{Profiler, ProfilerConfig},
    report,
};
use anyhow::Context;
use log::*;
use std::sync::Arc;
use vitral_utils::{AnyResult, FrameArena};
use winit::{
    event::{ElementState, KeyboardInput, VirtualKeyCode, WindowEvent},
    window::Window,
};

/// Owns everything a running instance needs and drives the per-frame sequence.
pub struct App {
    dc: Arc<DeviceContext>,
    surface: wgpu::Surface,
    scene: Scene,
    renderer: SceneRenderer,
    profiler: Profiler,
    arena: FrameArena,
    /// Window events received since the last frame, dispatched under a profiler span
    /// at the top of the next one.
    pending_events: Vec<WindowEvent<'static>>,
    frame_counter: u64,
    frame_limit: Option<u64>,
    quiet: bool,
}

impl App {
    pub fn new(args: &Args, window: &Window) -> Self {
        let (dc, surface, sconfig) = DeviceContext::create(window);
        let scene = Scene::stripes();
        let renderer = SceneRenderer::new(&dc, &sconfig, &scene);
        let profiler = Profiler::new(
            &dc,
            &ProfilerConfig {
                pipeline_depth: args.pipeline_depth,
                enable_gpu_queries: !args.no_gpu_profiling,
            },
        );

        Self {
            dc,
            surface,
            scene,
            renderer,
            profiler,
            arena: FrameArena::new(),
            pending_events: Vec::new(),
            frame_counter: 0,
            frame_limit: args.frame_limit,
            quiet: args.quiet,
        }
    }

    /// Queues a window event for dispatch at the top of the next frame.
    pub fn push_event(&mut self, event: WindowEvent<'static>) {
        self.pending_events.push(event);
    }

    /// Runs one full frame. Returns `Ok(false)` when the app should shut down
    /// cleanly; errors are fatal to the loop.
    pub fn frame(&mut self) -> AnyResult<bool> {
        // All of the previous frame's scratch dies here. Completed results were
        // already copied out of it, so reporting below only touches owned data.
        self.arena.reset();
        self.report_completed_frames();

        let tag = self.frame_counter;
        self.frame_counter += 1;
        self.profiler.start_frame(tag);

        let span = self.profiler.nest("event dispatch");
        let keep_running = self.dispatch_events();
        self.profiler.end_span(span);

        let span = self.profiler.nest("acquire surface");
        let frame = self
            .surface
            .get_current_texture()
            .context("couldn't acquire the next surface texture")?;
        self.profiler.end_span(span);

        let target = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .dc
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("scene encoder"),
            });
        self.renderer.render(
            &self.dc,
            &self.scene,
            &self.arena,
            &mut self.profiler,
            &mut encoder,
            &target,
        );
        self.dc.queue.submit([encoder.finish()]);

        self.profiler.finish_frame();

        // The timestamp copies go on their own encoder, submitted strictly after the
        // frame's rendering work.
        let mut encoder = self
            .dc
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("query resolve encoder"),
            });
        self.profiler.resolve(&mut encoder);
        self.dc.queue.submit([encoder.finish()]);
        self.profiler.map();

        frame.present();
        self.dc.device.poll(wgpu::Maintain::Poll);

        if let Some(limit) = self.frame_limit {
            if self.frame_counter >= limit {
                info!("Reached the frame limit of {limit}, exiting");
                return Ok(false);
            }
        }

        Ok(keep_running)
    }

    fn report_completed_frames(&mut self) {
        for results in self.profiler.collect() {
            if self.quiet {
                continue;
            }

            // Buffered so each frame's report hits the terminal in one write.
            let mut report = String::new();
            report::write_frame_results(&mut report, &results)
                .expect("writing to a String can't fail");
            println!("{report}");
        }
    }

    /// Returns false when the user asked to quit.
    fn dispatch_events(&mut self) -> bool {
        let mut keep_running = true;
        for event in self.pending_events.drain(..) {
            if let WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Pressed,
                        virtual_keycode: Some(VirtualKeyCode::Escape),
                        ..
                    },
                ..
            } = event
            {
                info!("Escape pressed, exiting");
                keep_running = false;
            }
        }
        keep_running
    }
}
