// =============================================================================
// FRAME LOOP - runs on its own thread until the stop flag is raised
// =============================================================================
//
// PER ITERATION:
// ┌─────────────────────────────────────────────────────────────────┐
// │ stop gate -> timestamp (dt, θ, deadline)                        │
// │   -> wait fence + reset   (at most one frame in flight)         │
// │   -> acquire image        (signals image-available)             │
// │   -> record               (rotation from θ)                     │
// │   -> submit               (waits image-available, signals       │
// │                            render-finished + fence)             │
// │   -> present              (waits render-finished)               │
// │   -> sleep until deadline (never negative, no catch-up)         │
// └─────────────────────────────────────────────────────────────────┘
//
// The loop never cleans up. On a fatal error it returns; teardown belongs to
// the shutdown coordinator on the control thread.
//
// =============================================================================

use std::time::{Duration, Instant};

use crate::error::FrameError;
use crate::recorder::{record_frame, FrameRecording};
use crate::shutdown::StopFlag;

pub use crate::backend::SwapchainStatus;

/// GPU side of one frame, split along the loop's stages.
///
/// Owned by the loop thread for its whole life and handed back to the
/// control thread on join.
pub trait FrameBackend: Send + 'static {
    /// Block until the previous submission retired, then reset the fence
    fn wait_for_previous_frame(&mut self) -> Result<(), FrameError>;

    fn acquire_image(&mut self) -> Result<(u32, SwapchainStatus), FrameError>;

    fn record(&mut self, recording: &FrameRecording) -> Result<(), FrameError>;

    fn submit(&mut self) -> Result<(), FrameError>;

    fn present(&mut self, image_index: u32) -> Result<SwapchainStatus, FrameError>;

    /// Device-wide drain, called once by the shutdown coordinator
    fn wait_idle(&self) -> Result<(), FrameError>;
}

/// Time source for pacing
pub trait Clock: Send + 'static {
    fn now(&self) -> Instant;

    /// Sleep until `deadline`; returns immediately if it already passed
    fn sleep_until(&self, deadline: Instant);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Minimum wall time per iteration (1 / target fps)
    pub frame_budget: Duration,
    /// Log frame rate once per second
    pub report_fps: bool,
}

impl LoopSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            frame_budget: config.frame_budget(),
            report_fps: config.debug.show_fps,
        }
    }
}

/// Timing of the iteration in progress
#[derive(Debug, Clone, Copy)]
pub struct FrameState {
    pub begin: Instant,
    /// Seconds since the previous iteration began
    pub dt: f64,
    /// θ: accumulated seconds, drives the rotation
    pub elapsed: f64,
    pub deadline: Instant,
}

/// What an orderly exit reports back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSummary {
    pub frames: u64,
    pub elapsed: f64,
}

pub struct FrameLoop<B, C> {
    backend: B,
    clock: C,
    settings: LoopSettings,
    elapsed: f64,
    frames: u64,
}

impl<B: FrameBackend, C: Clock> FrameLoop<B, C> {
    pub fn new(backend: B, clock: C, settings: LoopSettings) -> Self {
        Self {
            backend,
            clock,
            settings,
            elapsed: 0.0,
            frames: 0,
        }
    }

    /// Run until `stop` is observed at the top of an iteration.
    ///
    /// An in-progress iteration always finishes its submit and present.
    pub fn run(&mut self, stop: &StopFlag) -> Result<LoopSummary, FrameError> {
        log::info!(
            "Frame loop started (budget {:.3}ms)",
            self.settings.frame_budget.as_secs_f64() * 1000.0
        );

        let mut previous = self.clock.now();
        let mut fps = FpsCounter::new(previous);

        while !stop.is_requested() {
            let frame = self.begin_frame(&mut previous);
            self.render(&frame)?;
            self.frames += 1;

            if self.settings.report_fps {
                fps.tick(frame.begin, frame.dt);
            }

            // Pace
            self.clock.sleep_until(frame.deadline);
        }

        log::info!("Frame loop observed stop request after {} frames", self.frames);
        Ok(self.summary())
    }

    fn begin_frame(&mut self, previous: &mut Instant) -> FrameState {
        let begin = self.clock.now();
        let dt = begin.saturating_duration_since(*previous).as_secs_f64();
        *previous = begin;
        self.elapsed += dt;

        FrameState {
            begin,
            dt,
            elapsed: self.elapsed,
            deadline: begin + self.settings.frame_budget,
        }
    }

    fn render(&mut self, frame: &FrameState) -> Result<(), FrameError> {
        self.backend.wait_for_previous_frame()?;

        let (image_index, status) = self.backend.acquire_image()?;
        if status == SwapchainStatus::Suboptimal {
            log::debug!("Acquire returned SUBOPTIMAL for image {}", image_index);
        }

        let recording = record_frame(image_index, frame.elapsed);
        self.backend.record(&recording)?;

        self.backend.submit()?;

        if self.backend.present(image_index)? == SwapchainStatus::Suboptimal {
            log::debug!("Present returned SUBOPTIMAL for image {}", image_index);
        }

        Ok(())
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            frames: self.frames,
            elapsed: self.elapsed,
        }
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_update: now,
        }
    }

    /// Count a frame that began at `now`, `dt` seconds after the previous one
    fn tick(&mut self, now: Instant, dt: f64) {
        self.frame_count += 1;

        let window = now.saturating_duration_since(self.last_update).as_secs_f64();
        if window >= 1.0 {
            log::info!(
                "{:.0} FPS ({:.2}ms)",
                f64::from(self.frame_count) / window,
                dt * 1000.0
            );
            self.frame_count = 0;
            self.last_update = now;
        }
    }
}
