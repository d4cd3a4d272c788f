// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each type owns its handles and exposes an explicit
// destroy; RenderContext decides the order.

pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use pipeline::TrianglePipeline;
pub use swapchain::{Swapchain, SwapchainImage, SwapchainStatus};
pub use sync::FrameSync;
