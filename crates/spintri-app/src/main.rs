// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use spintri_core::{init_tracing, FpsCounter};
use spintri_pipeline::SpinRecipe;
use spintri_platform::FrameGate;
use spintri_render::{FrameStatus, RenderSize, Renderer};
use spintri_render_vk::{GpuError, VkRenderer};
use tracing::{debug, error, info, trace};

use spintri_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::AppCfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "spintri.toml")]
    config: PathBuf,
    /// Initial window width in pixels
    #[arg(long)]
    width: Option<u32>,
    /// Initial window height in pixels
    #[arg(long)]
    height: Option<u32>,
}

struct App {
    cfg: AppCfg,
    // Dropped before the window it draws into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    gate: FrameGate,
    fps: FpsCounter,
    paused: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let render_size = RenderSize::new(cfg.window.width, cfg.window.height);
        App {
            cfg,
            renderer: None,
            window: None,
            render_size,
            gate: FrameGate::open(),
            fps: FpsCounter::new(Duration::from_secs(1)),
            paused: false,
            exiting: false,
            failure: None,
        }
    }

    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.failure = Some(err);
        self.shut_down(event_loop);
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        window.pre_present_notify();
        match renderer.render() {
            Ok(FrameStatus::Presented) => self.fps.frame(),
            Ok(FrameStatus::Rebuilt) => {}
            Err(e) => {
                let recreate = e.downcast_ref::<GpuError>().is_some_and(GpuError::is_recreate);
                if recreate {
                    error!("swapchain could not be rebuilt: {e:#}");
                } else {
                    error!("render error: {e:#}");
                }
                self.fail(event_loop, e);
                return;
            }
        }
        window.request_redraw();
        self.frame_finished();
    }

    /// Redraws are coalesced by winit and also arrive for resizes, resumes
    /// and exposes; only one per finished frame renders.
    fn admit_redraw(&mut self) -> bool {
        !self.exiting && !self.paused && self.gate.take()
    }

    fn frame_finished(&mut self) {
        self.gate.signal();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attrs = Window::default_attributes()
                .with_title(self.cfg.window.title.clone())
                .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
            let window = event_loop.create_window(attrs).expect("create_window");

            let size = window.inner_size();
            self.render_size = RenderSize::new(size.width, size.height);

            let renderer = VkRenderer::new(
                &window,
                &window,
                self.render_size,
                SpinRecipe::factory(self.cfg.render.spin_speed),
            );
            let mut renderer = match renderer {
                Ok(r) => r,
                Err(e) => {
                    error!("vk init failed: {e:#}");
                    self.window = Some(window);
                    self.fail(event_loop, e);
                    return;
                }
            };
            renderer.set_clear_color(self.cfg.render.clear_color);

            info!(
                "window {}x{}, spin {} rad/s",
                self.render_size.width, self.render_size.height, self.cfg.render.spin_speed
            );
            self.window = Some(window);
            self.renderer = Some(renderer);
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.render_size.has_zero_area();
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shut_down(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = self.render_size.has_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                } else {
                    debug!("Resized → {}x{}", self.render_size.width, self.render_size.height);
                }

                if !self.paused {
                    if let Some(renderer) = &mut self.renderer {
                        if let Err(e) = renderer.resize(self.render_size) {
                            self.fail(event_loop, e);
                            return;
                        }
                    }
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.admit_redraw() {
                    self.draw(event_loop);
                } else {
                    trace!("redraw held back by frame gate");
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let now = Instant::now();
        if self.paused {
            self.fps.reset(now);
            return;
        }
        if let Some(frames) = self.fps.tick(now) {
            info!("fps ~ {}", frames);
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load(&args.config).with_size_overrides(args.width, args.height);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
