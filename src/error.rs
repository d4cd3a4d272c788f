// Frame loop errors
//
// Initialization uses anyhow (every failure there is reported and the app
// exits). Inside the loop the failure needs to say *where* it happened, so it
// gets a typed error carrying the frame stage and the raw Vulkan result.

use ash::vk;
use std::fmt;
use thiserror::Error;

/// Step of the per-frame state machine
///
/// WaitFence -> Acquire -> Record -> Submit -> Present, then the pacing sleep
/// (which cannot fail) and the stop gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    WaitFence,
    Acquire,
    Record,
    Submit,
    Present,
}

impl FrameStage {
    /// Wrap a Vulkan failure that happened during this stage
    pub fn error(self, result: vk::Result) -> FrameError {
        FrameError::Vulkan {
            stage: self,
            result,
        }
    }
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::WaitFence => "fence wait",
            FrameStage::Acquire => "swapchain image acquire",
            FrameStage::Record => "command recording",
            FrameStage::Submit => "queue submit",
            FrameStage::Present => "present",
        };
        f.write_str(name)
    }
}

/// Unrecoverable failure of the frame loop or its teardown
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{stage} failed: {result}")]
    Vulkan {
        stage: FrameStage,
        result: vk::Result,
    },

    /// Acquire handed out an index the swapchain does not have
    #[error("command recording failed: image index {index} out of range ({count} images)")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("device idle-wait failed: {0}")]
    WaitIdle(vk::Result),

    #[error("frame loop thread panicked")]
    LoopPanicked,
}

#[cfg(test)]
impl FrameError {
    /// Stage the loop was in when it failed, if the failure came from the loop
    pub fn stage(&self) -> Option<FrameStage> {
        match self {
            FrameError::Vulkan { stage, .. } => Some(*stage),
            FrameError::ImageIndexOutOfRange { .. } => Some(FrameStage::Record),
            _ => None,
        }
    }
}

/// Receives the one fatal error a loop thread can produce.
///
/// Called on the loop thread right before it exits, so implementations must
/// only hand the message over to the control thread.
pub trait FatalReporter: Send + 'static {
    fn report(&self, error: &FrameError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_message_names_the_stage() {
        let err = FrameStage::Acquire.error(vk::Result::ERROR_DEVICE_LOST);
        let message = err.to_string();
        assert!(message.starts_with("swapchain image acquire failed"), "{message}");
        assert_eq!(err.stage(), Some(FrameStage::Acquire));
    }

    #[test]
    fn non_stage_errors_have_no_stage() {
        assert_eq!(FrameError::LoopPanicked.stage(), None);
        assert_eq!(FrameError::WaitIdle(vk::Result::ERROR_DEVICE_LOST).stage(), None);
    }
}
