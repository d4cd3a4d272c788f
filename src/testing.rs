// Test doubles for the frame loop: a scripted GPU, a virtual clock and a
// reporter that counts.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;

use crate::error::{FatalReporter, FrameError, FrameStage};
use crate::frame_loop::{Clock, FrameBackend, SwapchainStatus};
use crate::recorder::FrameRecording;
use crate::shutdown::StopFlag;

// =============================================================================
// CLOCK
// =============================================================================

#[derive(Debug, Default)]
struct ClockState {
    slept: Duration,
    late_deadlines: usize,
    offset: Duration,
}

/// Virtual time: only moves when something advances or sleeps on it
#[derive(Debug, Clone)]
pub struct FakeClock {
    origin: Instant,
    state: Arc<Mutex<ClockState>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::default(),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().offset += by;
    }

    /// Total time spent in `sleep_until`
    pub fn slept(&self) -> Duration {
        self.state.lock().slept
    }

    /// Sleeps whose deadline had already passed
    pub fn late_deadlines(&self) -> usize {
        self.state.lock().late_deadlines
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().offset
    }

    fn sleep_until(&self, deadline: Instant) {
        let mut state = self.state.lock();
        let now = self.origin + state.offset;
        if deadline > now {
            let wait = deadline - now;
            state.offset += wait;
            state.slept += wait;
        } else {
            state.late_deadlines += 1;
        }
    }
}

// =============================================================================
// BACKEND
// =============================================================================

/// Everything the fake backend saw, shared with the test after the backend
/// has moved to the loop thread
#[derive(Debug, Default)]
pub struct FakeLog {
    pub fence_waits: usize,
    pub acquires: usize,
    pub submits: usize,
    pub idle_waits: usize,
    pub destroyed: usize,
    pub frame_starts: Vec<Instant>,
    pub recordings: Vec<FrameRecording>,
    pub presented: Vec<u32>,
    /// Ordering rules the loop broke, in plain words
    pub violations: Vec<String>,
}

/// GPU stand-in that models the fence and the acquire/present pairing.
///
/// Submitted work retires instantly; `work_cost` is charged to the clock at
/// submit.
pub struct FakeBackend {
    clock: FakeClock,
    log: Arc<Mutex<FakeLog>>,
    image_count: u32,
    work_cost: Duration,
    fence_signaled: bool,
    acquired: Option<u32>,
    fail_acquire_at: Option<usize>,
    suboptimal_present_at: Option<usize>,
    panic_at_present: Option<usize>,
    stop_after: Option<(usize, StopFlag)>,
    hold_after: Option<(usize, StopFlag, Sender<()>)>,
}

impl FakeBackend {
    pub fn new(clock: FakeClock) -> Self {
        Self {
            clock,
            log: Arc::default(),
            image_count: 2,
            work_cost: Duration::from_micros(100),
            // Created signaled, like the real fence
            fence_signaled: true,
            acquired: None,
            fail_acquire_at: None,
            suboptimal_present_at: None,
            panic_at_present: None,
            stop_after: None,
            hold_after: None,
        }
    }

    pub fn log(&self) -> Arc<Mutex<FakeLog>> {
        self.log.clone()
    }

    pub fn image_count(mut self, count: u32) -> Self {
        self.image_count = count;
        self
    }

    pub fn work_cost(mut self, cost: Duration) -> Self {
        self.work_cost = cost;
        self
    }

    /// The `frame`th acquire (1-based) fails with DEVICE_LOST
    pub fn fail_acquire_at(mut self, frame: usize) -> Self {
        self.fail_acquire_at = Some(frame);
        self
    }

    /// The `frame`th present (1-based) reports SUBOPTIMAL
    pub fn suboptimal_present_at(mut self, frame: usize) -> Self {
        self.suboptimal_present_at = Some(frame);
        self
    }

    /// The `frame`th present (1-based) panics after the image was presented
    pub fn panic_at_present(mut self, frame: usize) -> Self {
        self.panic_at_present = Some(frame);
        self
    }

    /// Raise `stop` from inside the `frames`th present
    pub fn stop_after(mut self, frames: usize, stop: StopFlag) -> Self {
        self.stop_after = Some((frames, stop));
        self
    }

    /// After the `frames`th present, notify `ready` and block until someone
    /// else raises `stop`
    pub fn hold_after(mut self, frames: usize, stop: StopFlag, ready: Sender<()>) -> Self {
        self.hold_after = Some((frames, stop, ready));
        self
    }
}

impl FrameBackend for FakeBackend {
    fn wait_for_previous_frame(&mut self) -> Result<(), FrameError> {
        let now = self.clock.now();
        let mut log = self.log.lock();
        if !self.fence_signaled {
            log.violations
                .push("waited on a fence nothing will signal".to_string());
        }
        self.fence_signaled = false;
        log.fence_waits += 1;
        log.frame_starts.push(now);
        Ok(())
    }

    fn acquire_image(&mut self) -> Result<(u32, SwapchainStatus), FrameError> {
        let mut log = self.log.lock();
        log.acquires += 1;

        if self.fail_acquire_at == Some(log.acquires) {
            return Err(FrameStage::Acquire.error(vk::Result::ERROR_DEVICE_LOST));
        }
        if let Some(held) = self.acquired {
            log.violations
                .push(format!("acquired again while image {} was held", held));
        }

        let index = (log.acquires - 1) as u32 % self.image_count;
        self.acquired = Some(index);
        Ok((index, SwapchainStatus::Optimal))
    }

    fn record(&mut self, recording: &FrameRecording) -> Result<(), FrameError> {
        let mut log = self.log.lock();
        if self.fence_signaled {
            log.violations
                .push("recorded while the previous frame may be in flight".to_string());
        }
        if self.acquired != Some(recording.image_index) {
            log.violations.push(format!(
                "recorded for image {} which is not acquired",
                recording.image_index
            ));
        }
        log.recordings.push(recording.clone());
        Ok(())
    }

    fn submit(&mut self) -> Result<(), FrameError> {
        let mut log = self.log.lock();
        if self.fence_signaled {
            log.violations
                .push("submitted with the fence still signaled".to_string());
        }
        log.submits += 1;
        // Work retires immediately and signals the fence
        self.fence_signaled = true;
        self.clock.advance(self.work_cost);
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<SwapchainStatus, FrameError> {
        let presented = {
            let mut log = self.log.lock();
            match self.acquired.take() {
                Some(index) if index == image_index => {}
                other => log.violations.push(format!(
                    "presented image {} while holding {:?}",
                    image_index, other
                )),
            }
            log.presented.push(image_index);
            log.presented.len()
        };

        if self.panic_at_present == Some(presented) {
            panic!("present {} panicked", presented);
        }
        if let Some((frames, stop)) = &self.stop_after {
            if presented == *frames {
                stop.request();
            }
        }
        if let Some((frames, stop, ready)) = &self.hold_after {
            if presented == *frames {
                let _ = ready.send(());
                while !stop.is_requested() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }

        if self.suboptimal_present_at == Some(presented) {
            Ok(SwapchainStatus::Suboptimal)
        } else {
            Ok(SwapchainStatus::Optimal)
        }
    }

    fn wait_idle(&self) -> Result<(), FrameError> {
        self.log.lock().idle_waits += 1;
        Ok(())
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.log.lock().destroyed += 1;
    }
}

// =============================================================================
// REPORTER
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CountingReporter(Arc<AtomicUsize>);

impl CountingReporter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Poll until at least `count` reports arrived or `timeout` passes
    pub fn wait_for(&self, count: usize, timeout: Duration) {
        let give_up = Instant::now() + timeout;
        while self.count() < count && Instant::now() < give_up {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl FatalReporter for CountingReporter {
    fn report(&self, _error: &FrameError) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}
