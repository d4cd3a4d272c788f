// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (surface extensions from the window, optional validation)
// - Physical device selection (prefer discrete GPU, must meet requirements)
// - Logical device + queue creation with dynamic rendering and synchronization2
//
// Requirements are checked up front; a device that lacks any of them is a
// fatal initialization error.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

/// The frame loop submits and presents on the first queue of this family
pub const GRAPHICS_QUEUE_FAMILY: u32 = 0;

/// Lowest Vulkan version with core dynamic rendering and synchronization2
pub const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `display_handle` - Display the swapchain surface will be created on
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let instance_version = unsafe { entry.try_enumerate_instance_version() }
            .context("Failed to query Vulkan instance version")?
            .unwrap_or(vk::API_VERSION_1_0);
        if instance_version < REQUIRED_API_VERSION {
            anyhow::bail!(
                "Unsupported Vulkan version {}.{}. Need at least Vulkan 1.3.",
                vk::api_version_major(instance_version),
                vk::api_version_minor(instance_version)
            );
        }

        // Step 2: Create instance
        let instance =
            Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { destroy_instance(&instance, None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Step 4: Pick physical device (GPU)
        // Step 5: Create logical device
        let selected = Self::pick_physical_device(&instance).and_then(|physical_device| {
            Self::create_logical_device(&instance, physical_device)
                .map(|(device, queue)| (physical_device, device, queue))
        });
        let (physical_device, device, graphics_queue) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug_utils) };
                return Err(e);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Self {
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family: GRAPHICS_QUEUE_FAMILY,
            debug_utils,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        // Surface extensions for this platform's display
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device that meets every requirement
        let mut best_device = None;
        let mut best_score = 0;
        let mut last_rejection = None;

        for device in devices {
            if let Err(reason) = Self::check_device_requirements(instance, device) {
                log::debug!("Skipping GPU: {:#}", reason);
                last_rejection = Some(reason);
                continue;
            }

            let props = unsafe { instance.get_physical_device_properties(device) };
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some(device);
            }
        }

        match (best_device, last_rejection) {
            (Some(device), _) => Ok(device),
            (None, Some(reason)) => Err(reason.context("No suitable GPU found")),
            (None, None) => anyhow::bail!("No suitable GPU found"),
        }
    }

    /// Vulkan 1.3, VK_KHR_swapchain, dynamicRendering, synchronization2 and a
    /// graphics-capable queue family 0
    fn check_device_requirements(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
    ) -> Result<()> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        if props.api_version < REQUIRED_API_VERSION {
            anyhow::bail!("Vulkan device must support 1.3");
        }

        let available = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let has_swapchain = available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == ash::khr::swapchain::NAME
        });
        if !has_swapchain {
            anyhow::bail!("Missing required extension {:?}", ash::khr::swapchain::NAME);
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };

        if features13.dynamic_rendering == vk::FALSE {
            anyhow::bail!("Device feature dynamicRendering not available");
        }
        if features13.synchronization2 == vk::FALSE {
            anyhow::bail!("Device feature synchronization2 not available");
        }

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let graphics_capable = queue_families
            .get(GRAPHICS_QUEUE_FAMILY as usize)
            .is_some_and(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));
        if !graphics_capable {
            anyhow::bail!("Queue family {} is not graphics capable", GRAPHICS_QUEUE_FAMILY);
        }

        Ok(())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(GRAPHICS_QUEUE_FAMILY)
            .queue_priorities(&queue_priorities);

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(GRAPHICS_QUEUE_FAMILY, 0) };

        Ok((device, graphics_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> ash::prelude::VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Everything created from the device is gone by now (see RenderContext)
        unsafe {
            self.device.destroy_device(None);
            destroy_instance(&self.instance, self.debug_utils.take());
        }
    }
}

/// Debug messenger, then the instance itself
unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((debug_utils, messenger)) = debug_utils {
        debug_utils.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
