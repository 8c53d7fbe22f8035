// Per-slot synchronization and command pools
//
// Each frame slot owns a fence (CPU waits on it before reusing the slot), the
// acquire semaphore, and a command pool holding the slot's primary buffer plus
// its pooled secondaries. Render finished semaphores live on the swapchain.

use anyhow::{Context, Result};
use ash::vk;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub command_pool: vk::CommandPool,
    pub primary: vk::CommandBuffer,
}

impl FrameSync {
    pub fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a fresh slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        unsafe {
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .context("Failed to create frame command pool")?;
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let primary = device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate primary command buffer")?[0];

            Ok(Self {
                image_available: device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.create_fence(&fence_info, None)?,
                command_pool,
                primary,
            })
        }
    }

    pub fn allocate_secondary(&self, device: &ash::Device, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(count as u32);
        unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate secondary command buffers")
    }

    /// Swap in a fresh acquire semaphore, returning the old one. An acquire
    /// that was abandoned for a swapchain rebuild may have left it signaled.
    pub fn renew_image_available(&mut self, device: &ash::Device) -> Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fresh = unsafe { device.create_semaphore(&semaphore_info, None) }?;
        Ok(std::mem::replace(&mut self.image_available, fresh))
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
            // Frees the primary and every secondary with it
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
