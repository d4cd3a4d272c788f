// =============================================================================
// SPINNING TRIANGLE - Vulkan frame submission on a dedicated thread
// =============================================================================
//
// A white window with one rotating triangle. The interesting part is not the
// triangle but how frames reach the screen.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Control thread (winit event loop)                              │
// │    ├── creates the window and the RenderContext                 │
// │    ├── hands the context to the frame loop thread               │
// │    └── on close / Esc / fatal error: stop, join, idle, destroy  │
// │                                                                 │
// │  Frame loop thread                                              │
// │    └── fence -> acquire -> record -> submit -> present -> pace  │
// └─────────────────────────────────────────────────────────────────┘
//
// One frame in flight, paced to the configured rate (240 Hz by default).
//
// =============================================================================

mod backend;
mod config;
mod context;
mod error;
mod frame_loop;
mod recorder;
mod shutdown;
#[cfg(test)]
mod testing;

use anyhow::Result;
use config::Config;
use context::RenderContext;
use error::{FatalReporter, FrameError};
use frame_loop::{FrameLoop, LoopSettings, SystemClock};
use shutdown::{RenderThread, StopFlag};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_source) = Config::load();

    // Initialize logging, then report how the config was found
    init_logging(&config);
    log::info!("Starting spinning triangle");
    config_source.log();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{}, target {} FPS, present mode {}",
        config.window.width,
        config.window.height,
        config.graphics.target_fps,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::<LoopEvent>::with_user_event().build()?;
    let mut app = App::new(config, event_loop.create_proxy());
    event_loop.run_app(&mut app)?;

    match app.exit_error.take() {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => {
            log::info!("Exited cleanly");
            Ok(())
        }
    }
}

/// Initialize logging, optionally writing records to the configured file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still wins over the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Spinning Triangle Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Could not open log file {}: {}. Logging to stderr.",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}

// =============================================================================
// LOOP -> CONTROL THREAD
// =============================================================================

/// Wakes the event loop from the frame loop thread
#[derive(Debug)]
enum LoopEvent {
    Fatal(String),
}

struct ProxyReporter(EventLoopProxy<LoopEvent>);

impl FatalReporter for ProxyReporter {
    fn report(&self, error: &FrameError) {
        if self.0.send_event(LoopEvent::Fatal(error.to_string())).is_err() {
            log::warn!("Event loop already closed, fatal error not delivered");
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    proxy: EventLoopProxy<LoopEvent>,

    // Declared before the window: the loop thread must be gone before the
    // surface's window is
    render_thread: Option<RenderThread<RenderContext>>,
    window: Option<Arc<Window>>,

    /// Set when the app exits because something failed
    exit_error: Option<String>,
}

impl App {
    fn new(config: Config, proxy: EventLoopProxy<LoopEvent>) -> Self {
        Self {
            config,
            proxy,
            render_thread: None,
            window: None,
            exit_error: None,
        }
    }

    /// Create the GPU context and start the frame loop thread
    fn start(&mut self, window: &Window) -> Result<RenderThread<RenderContext>> {
        let context = RenderContext::new(&self.config, window)?;

        let frame_loop = FrameLoop::new(
            context,
            SystemClock,
            LoopSettings::from_config(&self.config),
        );
        let thread = RenderThread::spawn(
            frame_loop,
            StopFlag::new(),
            ProxyReporter(self.proxy.clone()),
        )?;

        Ok(thread)
    }

    /// Stop the loop thread and destroy every GPU object. Safe to call more
    /// than once.
    fn shutdown(&mut self) {
        if let Some(thread) = self.render_thread.take() {
            if let Some(Err(e)) = thread.shutdown() {
                // Fatal errors already arrived through the proxy
                if self.exit_error.is_none() {
                    self.exit_error = Some(e.to_string());
                }
            }
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, message: String) {
        log::error!("{}", message);
        self.exit_error = Some(message);
        self.shutdown();
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler<LoopEvent> for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Fixed size: the swapchain is never recreated
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, format!("Failed to create window: {}", e));
                return;
            }
        };

        match self.start(&window) {
            Ok(thread) => self.render_thread = Some(thread),
            Err(e) => {
                self.window = Some(window);
                self.fail(event_loop, format!("Failed to initialize Vulkan: {:#}", e));
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Fatal error from the frame loop thread
    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: LoopEvent) {
        match event {
            LoopEvent::Fatal(message) => {
                self.fail(event_loop, format!("Rendering stopped: {}", message));
            }
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        // GPU objects go before the window they present to
        self.shutdown();
        self.window.take();
    }
}
