// Synchronization primitives
//
// One fence for GPU->CPU, two semaphores for GPU->GPU ordering.
// A single set exists: the loop keeps exactly one frame in flight.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;

/// Frame synchronization
///
/// - `image_available`: acquire -> render (signaled by the presentation engine)
/// - `render_finished`: render -> present
/// - `in_flight_fence`: signaled when the submitted frame retires; the CPU
///   waits on it before touching the command buffer again
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first frame does not wait forever
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let in_flight_fence = unsafe { device.create_fence(&fence_info, None) }
            .context("Failed to create in-flight fence")?;

        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_fence(in_flight_fence, None) };
                return Err(e).context("Failed to create render-finished semaphore");
            }
        };

        let image_available = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_fence(in_flight_fence, None);
                }
                return Err(e).context("Failed to create image-available semaphore");
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the previous submission retired, then unsignal the fence
    /// for the next one
    pub fn wait_and_reset(&self, device: &ash::Device, timeout: u64) -> VkResult<()> {
        unsafe {
            device.wait_for_fences(&[self.in_flight_fence], true, timeout)?;
            device.reset_fences(&[self.in_flight_fence])
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
