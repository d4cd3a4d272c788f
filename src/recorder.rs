// Command recording - one command sequence per frame
//
// A frame is described as a fixed list of commands first and encoded into the
// Vulkan command buffer second. The description is plain data, so the order
// and the barrier parameters can be checked without a GPU.
//
// FRAME SEQUENCE (fixed, no branches):
// ┌──────────────────────────────────────────────────────────────────────┐
// │ reset pool -> begin -> UNDEFINED→COLOR_ATTACHMENT -> begin rendering │
// │ -> bind pipeline -> push rotation -> draw 3 -> end rendering         │
// │ -> COLOR_ATTACHMENT→PRESENT_SRC -> end                               │
// └──────────────────────────────────────────────────────────────────────┘

use ash::prelude::VkResult;
use ash::vk;
use glam::{DMat2, Mat2};

use crate::backend::swapchain::SwapchainImage;

/// Opaque white
pub const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Size of the per-draw push-constant block (one column-major 2x2 f32 matrix)
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<Mat2>() as u32;

/// Vertices of the triangle; positions are generated in the vertex shader
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

/// Number of commands in every frame
pub const FRAME_COMMAND_COUNT: usize = 10;

/// Whole color image, single mip, single layer
const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Image layout transition expressed in synchronization2 terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Acquired image -> render target. Previous contents are discarded, the
/// render pass clears them.
pub const TO_RENDER_TARGET: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::UNDEFINED,
    new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    src_access: vk::AccessFlags2::NONE,
    dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
};

/// Render target -> presentation engine. The render-finished semaphore
/// orders the present, so there is no destination scope.
pub const TO_PRESENT: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    dst_stage: vk::PipelineStageFlags2::NONE,
    dst_access: vk::AccessFlags2::NONE,
};

/// One step of the frame's command sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameCommand {
    /// Recycle the pool's backing storage (no reallocation)
    ResetPool,
    /// Begin the command buffer for a single submission
    Begin,
    Barrier(LayoutTransition),
    BeginRendering { clear_color: [f32; 4] },
    BindPipeline,
    PushTransform(Mat2),
    Draw { vertex_count: u32, instance_count: u32 },
    EndRendering,
    /// Close the command buffer for submission
    End,
}

/// Commands for one frame, targeting one acquired swapchain image
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecording {
    pub image_index: u32,
    /// Accumulated elapsed seconds the rotation was computed from
    pub elapsed: f64,
    pub commands: [FrameCommand; FRAME_COMMAND_COUNT],
}

#[cfg(test)]
impl FrameRecording {
    /// The rotation pushed to the pipeline in this frame
    pub fn transform(&self) -> Option<Mat2> {
        self.commands.iter().find_map(|command| match command {
            FrameCommand::PushTransform(transform) => Some(*transform),
            _ => None,
        })
    }
}

/// 2D rotation by `theta` radians: [[cos, -sin], [sin, cos]]
///
/// Computed in double precision because `theta` grows without bound over a
/// long run.
pub fn rotation(theta: f64) -> Mat2 {
    let cols = DMat2::from_angle(theta).to_cols_array();
    Mat2::from_cols_array(&cols.map(|v| v as f32))
}

/// Build the command sequence for `image_index` at `elapsed` seconds
pub fn record_frame(image_index: u32, elapsed: f64) -> FrameRecording {
    FrameRecording {
        image_index,
        elapsed,
        commands: [
            FrameCommand::ResetPool,
            FrameCommand::Begin,
            FrameCommand::Barrier(TO_RENDER_TARGET),
            FrameCommand::BeginRendering {
                clear_color: CLEAR_COLOR,
            },
            FrameCommand::BindPipeline,
            FrameCommand::PushTransform(rotation(elapsed)),
            FrameCommand::Draw {
                vertex_count: TRIANGLE_VERTEX_COUNT,
                instance_count: 1,
            },
            FrameCommand::EndRendering,
            FrameCommand::Barrier(TO_PRESENT),
            FrameCommand::End,
        ],
    }
}

/// Everything needed to turn a [`FrameRecording`] into Vulkan commands
pub struct CommandEncoder<'a> {
    pub device: &'a ash::Device,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub target: SwapchainImage,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
}

impl CommandEncoder<'_> {
    /// Encode `recording` into the command buffer.
    ///
    /// The command buffer must not be pending execution (the in-flight fence
    /// has been waited on).
    pub fn encode(&self, recording: &FrameRecording) -> VkResult<()> {
        let device = self.device;
        let cmd = self.command_buffer;

        for command in &recording.commands {
            unsafe {
                match *command {
                    FrameCommand::ResetPool => {
                        device.reset_command_pool(
                            self.command_pool,
                            vk::CommandPoolResetFlags::empty(),
                        )?;
                    }
                    FrameCommand::Begin => {
                        let begin_info = vk::CommandBufferBeginInfo::default()
                            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                        device.begin_command_buffer(cmd, &begin_info)?;
                    }
                    FrameCommand::Barrier(transition) => {
                        let barrier = vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(transition.src_stage)
                            .src_access_mask(transition.src_access)
                            .dst_stage_mask(transition.dst_stage)
                            .dst_access_mask(transition.dst_access)
                            .old_layout(transition.old_layout)
                            .new_layout(transition.new_layout)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(self.target.image)
                            .subresource_range(COLOR_RANGE);

                        let dependency = vk::DependencyInfo::default()
                            .image_memory_barriers(std::slice::from_ref(&barrier));
                        device.cmd_pipeline_barrier2(cmd, &dependency);
                    }
                    FrameCommand::BeginRendering { clear_color } => {
                        let color_attachment = vk::RenderingAttachmentInfo::default()
                            .image_view(self.target.view)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .resolve_mode(vk::ResolveModeFlags::NONE)
                            .load_op(vk::AttachmentLoadOp::CLEAR)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue {
                                color: vk::ClearColorValue {
                                    float32: clear_color,
                                },
                            });

                        let rendering_info = vk::RenderingInfo::default()
                            .render_area(vk::Rect2D {
                                offset: vk::Offset2D { x: 0, y: 0 },
                                extent: self.extent,
                            })
                            .layer_count(1)
                            .color_attachments(std::slice::from_ref(&color_attachment));

                        device.cmd_begin_rendering(cmd, &rendering_info);
                    }
                    FrameCommand::BindPipeline => {
                        device.cmd_bind_pipeline(
                            cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            self.pipeline,
                        );
                    }
                    FrameCommand::PushTransform(transform) => {
                        device.cmd_push_constants(
                            cmd,
                            self.pipeline_layout,
                            vk::ShaderStageFlags::VERTEX,
                            0,
                            bytemuck::bytes_of(&transform),
                        );
                    }
                    FrameCommand::Draw {
                        vertex_count,
                        instance_count,
                    } => {
                        device.cmd_draw(cmd, vertex_count, instance_count, 0, 0);
                    }
                    FrameCommand::EndRendering => {
                        device.cmd_end_rendering(cmd);
                    }
                    FrameCommand::End => {
                        device.end_command_buffer(cmd)?;
                    }
                }
            }
        }

        Ok(())
    }
}
