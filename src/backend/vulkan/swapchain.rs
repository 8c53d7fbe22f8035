// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Each image owns the semaphore its presentation waits on, so a semaphore is
// never re-signaled while an earlier present of another image still holds it.
// Replaced swapchains are handed out as `RetiredSwapchain` and destroyed
// through the deferred destruction queue like any other object.

use anyhow::{Context, Result};
use ash::vk;

use crate::config::PresentMode;
use crate::resource::Extent;

pub struct Swapchain {
    pub raw: vk::SwapchainKHR,
    pub image_views: Vec<vk::ImageView>,
    /// Indexed by swapchain image.
    pub render_finished: Vec<vk::Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// A swapchain that has been replaced, plus the semaphores that were in use
/// with it.
pub struct RetiredSwapchain {
    pub(crate) raw: vk::SwapchainKHR,
    pub(crate) image_views: Vec<vk::ImageView>,
    pub(crate) semaphores: Vec<vk::Semaphore>,
}

pub fn vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

impl Swapchain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &ash::Device,
        loader: &ash::extensions::khr::Swapchain,
        surface_loader: &ash::extensions::khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        extent: Extent,
        present_mode: PresentMode,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }?;

        // Prefer UNORM so shader output is written as-is
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .context("No suitable surface format")?;

        let wanted = vk_present_mode(present_mode);
        let present_mode = if present_modes.contains(&wanted) {
            wanted
        } else {
            log::warn!("Present mode {:?} unsupported, falling back to FIFO", wanted);
            vk::PresentModeKHR::FIFO
        };

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: extent.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: extent.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let raw = unsafe { loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        let images = unsafe { loader.get_swapchain_images(raw) }?;

        log::info!(
            "Created swapchain {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            images.len(),
            present_mode
        );

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.create_image_view(&create_info, None) }
                    .context("Failed to create swapchain image view")
            })
            .collect::<Result<Vec<_>>>()?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let render_finished = image_views
            .iter()
            .map(|_| {
                unsafe { device.create_semaphore(&semaphore_info, None) }
                    .context("Failed to create render finished semaphore")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw,
            image_views,
            render_finished,
            format: surface_format.format,
            extent,
        })
    }

    pub fn retire(self, mut semaphores: Vec<vk::Semaphore>) -> RetiredSwapchain {
        semaphores.extend(self.render_finished);
        RetiredSwapchain {
            raw: self.raw,
            image_views: self.image_views,
            semaphores,
        }
    }
}

impl RetiredSwapchain {
    pub fn destroy(self, device: &ash::Device, loader: &ash::extensions::khr::Swapchain) {
        unsafe {
            for view in self.image_views {
                device.destroy_image_view(view, None);
            }
            for semaphore in self.semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            loader.destroy_swapchain(self.raw, None);
        }
    }
}
