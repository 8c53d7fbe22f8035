// Vulkan context - instance, surface, device, allocator
//
// Responsibilities:
// - Instance creation with validation layers and window-system extensions
// - Surface creation from raw window handles
// - Physical device selection (prefer discrete GPU, must present to the surface)
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context as _, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

/// Required Vulkan device features
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    fill_mode_non_solid: vk::TRUE,
    wide_lines: vk::TRUE,
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything that lives for the whole backend lifetime.
pub struct VulkanContext {
    pub allocator: ManuallyDrop<Allocator>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    pub queue: vk::Queue,
    pub queue_family: u32,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanContext {
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan context: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Instance with the extensions this window system needs
        let instance = Self::create_instance(&entry, app_name, display, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 3: Surface
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
            .context("Failed to create window surface")?;

        // Step 4: Pick a GPU that can present to it
        let (physical_device, queue_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        // Step 5: Logical device
        let (device, queue) = Self::create_logical_device(&instance, physical_device, queue_family)?;

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

        // Step 6: Memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue,
            queue_family,
            debug_utils,
            properties,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("frameline")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .context("Window system is not supported by Vulkan")?
            .to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };
            if !Self::check_device_features(&features) {
                continue;
            }

            // One queue family must do graphics, compute and present
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let family = families.iter().enumerate().find_map(|(index, family)| {
                let index = index as u32;
                let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
                let presents = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .unwrap_or(false);
                (family.queue_flags.contains(flags) && presents).then_some(index)
            });

            if let Some(family) = family {
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };
                if score > best_score {
                    best_score = score;
                    best = Some((device, family));
                }
            }
        }

        best.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn check_device_features(features: &vk::PhysicalDeviceFeatures) -> bool {
        features.fill_mode_non_solid == vk::TRUE
            && features.wide_lines == vk::TRUE
            && features.sampler_anisotropy == vk::TRUE
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, queue))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")
    }

    /// Destroy the allocator, device, surface and instance.
    ///
    /// # Safety
    /// Every object created from this context must already be destroyed, and
    /// the context must not be used afterwards.
    pub unsafe fn destroy(&mut self) {
        log::info!("Destroying Vulkan context...");
        ManuallyDrop::drop(&mut self.allocator);
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        if let Some((debug_utils, messenger)) = self.debug_utils.take() {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

/// Routes validation messages into `log`.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
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
