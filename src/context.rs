// =============================================================================
// RENDER CONTEXT - every GPU object the frame loop needs, in one owner
// =============================================================================
//
// CREATION ORDER:
//   device (entry, instance, debug messenger, GPU, logical device, queue)
//   -> swapchain (surface, swapchain, image views)
//   -> command pool + one command buffer
//   -> sync (fence, 2 semaphores)
//   -> pipeline (layout, pipeline)
//
// Destruction is the exact reverse and happens in Drop, after the shutdown
// coordinator has waited for the device to go idle.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::backend::{
    FrameSync, Swapchain, SwapchainImage, SwapchainStatus, TrianglePipeline, VulkanDevice,
};
use crate::config::Config;
use crate::error::{FrameError, FrameStage};
use crate::frame_loop::FrameBackend;
use crate::recorder::{CommandEncoder, FrameRecording};

pub struct RenderContext {
    // Fields are listed in destruction order; Drop handles all but `device`
    pipeline: TrianglePipeline,
    sync: FrameSync,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    swapchain: Swapchain,
    device: VulkanDevice,

    /// Upper bound for fence and acquire waits
    timeout: u64,
}

impl RenderContext {
    /// Create every GPU resource for `window`. Any failure is fatal and
    /// leaves nothing behind.
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .context("Window has no display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Window has no window handle")?
            .as_raw();

        // Validation is a debug-build feature only
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        // Step 1: Device
        let device = VulkanDevice::new(&config.window.title, display_handle, enable_validation)?;

        // Step 2: Swapchain
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &device,
            display_handle,
            window_handle,
            config.get_present_mode(),
            size.width,
            size.height,
        )?;

        // Step 3: Command pool + buffer
        let (command_pool, command_buffer) = match create_command_buffer(&device) {
            Ok(pair) => pair,
            Err(e) => {
                swapchain.destroy(&device.device);
                return Err(e);
            }
        };

        // Step 4: Sync
        let sync = match FrameSync::new(&device.device) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                swapchain.destroy(&device.device);
                return Err(e);
            }
        };

        // Step 5: Pipeline
        let pipeline = match TrianglePipeline::new(
            &device.device,
            swapchain.format.format,
            swapchain.extent,
            &config.shaders.vertex,
            &config.shaders.fragment,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                sync.destroy(&device.device);
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                swapchain.destroy(&device.device);
                return Err(e);
            }
        };

        log::info!(
            "Render context ready: {} images, {:?}",
            swapchain.images.len(),
            swapchain.present_mode
        );

        Ok(Self {
            pipeline,
            sync,
            command_pool,
            command_buffer,
            swapchain,
            device,
            timeout: u64::MAX,
        })
    }
}

/// Resettable pool on the graphics family with the single primary buffer the
/// loop re-records every frame
fn create_command_buffer(device: &VulkanDevice) -> Result<(vk::CommandPool, vk::CommandBuffer)> {
    // The whole pool is reset each frame, so no per-buffer reset flag
    let pool_info =
        vk::CommandPoolCreateInfo::default().queue_family_index(device.graphics_queue_family);

    let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")?;

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
        Ok(buffers) => Ok((command_pool, buffers[0])),
        Err(e) => {
            unsafe { device.device.destroy_command_pool(command_pool, None) };
            Err(e).context("Failed to allocate command buffer")
        }
    }
}

/// The swapchain slot an acquired index refers to
fn target_image(images: &[SwapchainImage], index: u32) -> Result<SwapchainImage, FrameError> {
    images
        .get(index as usize)
        .copied()
        .ok_or(FrameError::ImageIndexOutOfRange {
            index,
            count: images.len(),
        })
}

// =============================================================================
// FRAME STAGES
// =============================================================================

impl FrameBackend for RenderContext {
    fn wait_for_previous_frame(&mut self) -> Result<(), FrameError> {
        self.sync
            .wait_and_reset(&self.device.device, self.timeout)
            .map_err(|e| FrameStage::WaitFence.error(e))
    }

    fn acquire_image(&mut self) -> Result<(u32, SwapchainStatus), FrameError> {
        self.swapchain
            .acquire_next_image(self.timeout, self.sync.image_available)
            .map_err(|e| FrameStage::Acquire.error(e))
    }

    fn record(&mut self, recording: &FrameRecording) -> Result<(), FrameError> {
        let target = target_image(&self.swapchain.images, recording.image_index)?;

        let encoder = CommandEncoder {
            device: &self.device.device,
            command_pool: self.command_pool,
            command_buffer: self.command_buffer,
            target,
            extent: self.swapchain.extent,
            pipeline: self.pipeline.pipeline,
            pipeline_layout: self.pipeline.layout,
        };

        encoder
            .encode(recording)
            .map_err(|e| FrameStage::Record.error(e))
    }

    fn submit(&mut self) -> Result<(), FrameError> {
        let wait_semaphores = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.sync.image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let command_buffers =
            [vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer)];
        let signal_semaphores = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.sync.render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_semaphores)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit2(
                self.device.graphics_queue,
                &[submit_info],
                self.sync.in_flight_fence,
            )
        }
        .map_err(|e| FrameStage::Submit.error(e))
    }

    fn present(&mut self, image_index: u32) -> Result<SwapchainStatus, FrameError> {
        self.swapchain
            .present(
                self.device.graphics_queue,
                image_index,
                &[self.sync.render_finished],
            )
            .map_err(|e| FrameStage::Present.error(e))
    }

    fn wait_idle(&self) -> Result<(), FrameError> {
        self.device.wait_idle().map_err(FrameError::WaitIdle)
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for RenderContext {
    fn drop(&mut self) {
        log::info!("Destroying render context...");

        let device = &self.device.device;

        // 1. Pipeline + layout
        self.pipeline.destroy(device);

        // 2. Semaphores + fence
        self.sync.destroy(device);

        // 3. Command pool (also frees the command buffer)
        unsafe { device.destroy_command_pool(self.command_pool, None) };

        // 4. Image views, swapchain, surface
        self.swapchain.destroy(device);

        // 5. Device, debug messenger, instance: VulkanDevice's Drop
    }
}
