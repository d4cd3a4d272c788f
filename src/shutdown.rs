// =============================================================================
// SHUTDOWN - stop flag, loop thread ownership, orderly teardown
// =============================================================================
//
// The control thread owns a RenderThread. Shutdown is:
//   1. take the join handle (only the first caller gets it)
//   2. raise the stop flag
//   3. join: the loop hands the backend back with its result
//   4. wait for the device to go idle
//   5. drop the backend, which destroys GPU objects in reverse creation order
//
// =============================================================================

use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{FatalReporter, FrameError};
use crate::frame_loop::{Clock, FrameBackend, FrameLoop, LoopSummary};

/// One-shot cross-thread stop request
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns true if it was already raised.
    pub fn request(&self) -> bool {
        self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type LoopOutcome<B> = (B, Result<LoopSummary, FrameError>);

/// Handle to the frame loop thread
pub struct RenderThread<B: FrameBackend> {
    stop: StopFlag,
    handle: Mutex<Option<JoinHandle<LoopOutcome<B>>>>,
}

impl<B: FrameBackend> RenderThread<B> {
    /// Move `frame_loop` onto a new thread and start it.
    ///
    /// If the loop fails or panics, `reporter` is told once from the loop
    /// thread before it exits; the backend is still handed back so it is only
    /// destroyed after the device-idle wait.
    pub fn spawn<C, R>(
        mut frame_loop: FrameLoop<B, C>,
        stop: StopFlag,
        reporter: R,
    ) -> io::Result<Self>
    where
        C: Clock,
        R: FatalReporter,
    {
        let loop_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("frame-loop".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| frame_loop.run(&loop_stop)))
                    .unwrap_or_else(|_| Err(FrameError::LoopPanicked));
                if let Err(ref e) = result {
                    log::error!("Frame loop failed: {}", e);
                    reporter.report(e);
                }
                (frame_loop.into_backend(), result)
            })?;

        Ok(Self {
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the loop and tear everything down.
    ///
    /// Returns the loop's result the first time; later calls return `None`
    /// and do nothing.
    pub fn shutdown(&self) -> Option<Result<LoopSummary, FrameError>> {
        let handle = self.handle.lock().take()?;

        if self.stop.request() {
            log::debug!("Stop flag was already raised");
        }
        log::info!("Waiting for frame loop to exit...");

        let (backend, result) = match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                // Only reachable if the reporter itself panicked. The backend
                // was dropped during unwinding, without a device-idle wait.
                log::error!("Frame loop thread panicked outside the loop");
                return Some(Err(FrameError::LoopPanicked));
            }
        };

        match &result {
            Ok(summary) => log::info!(
                "Frame loop stopped after {} frames ({:.2}s)",
                summary.frames,
                summary.elapsed
            ),
            Err(e) => log::info!("Frame loop exited with error: {}", e),
        }

        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = backend.wait_idle() {
            log::warn!("{}; destroying resources anyway", e);
        }

        log::info!("Cleaning up GPU resources...");
        drop(backend);
        log::info!("Cleanup complete");

        Some(result)
    }
}

impl<B: FrameBackend> Drop for RenderThread<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_loop::LoopSettings;
    use crate::testing::{CountingReporter, FakeBackend, FakeClock};
    use std::sync::mpsc;
    use std::time::Duration;

    fn settings() -> LoopSettings {
        LoopSettings {
            frame_budget: Duration::from_nanos(4_166_666),
            report_fps: false,
        }
    }

    #[test]
    fn stop_flag_flips_once() {
        let stop = StopFlag::new();
        let other = stop.clone();
        assert!(!other.is_requested());
        assert!(!stop.request());
        assert!(other.is_requested());
        assert!(stop.request());
    }

    #[test]
    fn fifty_frames_then_stop() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let (tx, rx) = mpsc::channel();
        let backend = FakeBackend::new(clock.clone()).hold_after(50, stop.clone(), tx);
        let log = backend.log();
        let reporter = CountingReporter::default();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop.clone(),
            reporter.clone(),
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let summary = thread.shutdown().unwrap().unwrap();

        assert_eq!(summary.frames, 50);
        assert_eq!(reporter.count(), 0);

        let log = log.lock();
        assert_eq!(log.recordings.len(), 50);
        assert_eq!(log.submits, 50);
        assert_eq!(log.presented.len(), 50);
        assert_eq!(log.idle_waits, 1);
        assert_eq!(log.destroyed, 1);
        assert!(log.violations.is_empty(), "{:?}", log.violations);
    }

    #[test]
    fn suboptimal_present_is_not_fatal() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let (tx, rx) = mpsc::channel();
        let backend = FakeBackend::new(clock.clone())
            .suboptimal_present_at(10)
            .hold_after(20, stop.clone(), tx);
        let log = backend.log();
        let reporter = CountingReporter::default();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop,
            reporter.clone(),
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(thread.shutdown().unwrap().is_ok());
        assert_eq!(reporter.count(), 0);
        assert_eq!(log.lock().presented.len(), 20);
    }

    #[test]
    fn acquire_failure_reports_once_and_stops() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let backend = FakeBackend::new(clock.clone()).fail_acquire_at(5);
        let log = backend.log();
        let reporter = CountingReporter::default();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop,
            reporter.clone(),
        )
        .unwrap();

        reporter.wait_for(1, Duration::from_secs(10));
        let err = thread.shutdown().unwrap().unwrap_err();

        assert_eq!(err.stage(), Some(crate::error::FrameStage::Acquire));
        assert_eq!(reporter.count(), 1);

        let log = log.lock();
        assert_eq!(log.fence_waits, 5);
        assert_eq!(log.presented.len(), 4);
        assert_eq!(log.destroyed, 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let (tx, rx) = mpsc::channel();
        let backend = FakeBackend::new(clock.clone()).hold_after(3, stop.clone(), tx);
        let log = backend.log();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop,
            CountingReporter::default(),
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let summary = thread.shutdown().unwrap().unwrap();
        assert_eq!(summary.frames, 3);
        assert!(thread.shutdown().is_none());
        drop(thread);

        let log = log.lock();
        assert_eq!(log.idle_waits, 1);
        assert_eq!(log.destroyed, 1);
    }

    #[test]
    fn dropping_the_handle_shuts_down() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let (tx, rx) = mpsc::channel();
        let backend = FakeBackend::new(clock.clone()).hold_after(3, stop.clone(), tx);
        let log = backend.log();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop.clone(),
            CountingReporter::default(),
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        drop(thread);

        assert!(stop.is_requested());
        let log = log.lock();
        assert_eq!(log.presented.len(), 3);
        assert_eq!(log.idle_waits, 1);
        assert_eq!(log.destroyed, 1);
    }

    #[test]
    fn loop_panic_still_drains_before_destroying() {
        let clock = FakeClock::new();
        let stop = StopFlag::new();
        let backend = FakeBackend::new(clock.clone()).panic_at_present(4);
        let log = backend.log();
        let reporter = CountingReporter::default();

        let thread = RenderThread::spawn(
            FrameLoop::new(backend, clock, settings()),
            stop,
            reporter.clone(),
        )
        .unwrap();

        reporter.wait_for(1, Duration::from_secs(10));
        let err = thread.shutdown().unwrap().unwrap_err();

        assert!(matches!(err, FrameError::LoopPanicked));
        assert_eq!(reporter.count(), 1);
        let log = log.lock();
        assert_eq!(log.presented.len(), 4);
        assert_eq!(log.idle_waits, 1);
        assert_eq!(log.destroyed, 1);
    }
}
