// Buffers and images backed by gpu-allocator
//
// Host-writable buffers live in CpuToGpu memory and stay mapped; storage
// buffers, textures and attachments are GpuOnly.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::error::fatal;
use crate::resource::{AttachmentFormat, BufferDesc, BufferUsage, Filter, FramebufferDesc, TextureDesc};

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct VulkanBuffer {
    pub raw: vk::Buffer,
    pub size: u64,
    allocation: Allocation,
}

/// Image, its full-range view and the memory behind it.
pub struct ImageAllocation {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Allocation,
}

pub struct VulkanTexture {
    pub image: ImageAllocation,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
}

/// Offscreen color attachment, optionally paired with a depth attachment.
pub struct VulkanFramebuffer {
    pub color: ImageAllocation,
    pub depth: Option<ImageAllocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub sampler: vk::Sampler,
}

pub fn vk_format(format: AttachmentFormat) -> vk::Format {
    match format {
        AttachmentFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        AttachmentFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        AttachmentFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

fn buffer_usage(usage: BufferUsage) -> (vk::BufferUsageFlags, MemoryLocation) {
    let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    match usage {
        BufferUsage::Vertex => (vk::BufferUsageFlags::VERTEX_BUFFER | transfer, MemoryLocation::CpuToGpu),
        BufferUsage::Index => (vk::BufferUsageFlags::INDEX_BUFFER | transfer, MemoryLocation::CpuToGpu),
        BufferUsage::Uniform => (vk::BufferUsageFlags::UNIFORM_BUFFER | transfer, MemoryLocation::CpuToGpu),
        BufferUsage::Storage => (
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            MemoryLocation::GpuOnly,
        ),
        BufferUsage::Staging => (vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu),
    }
}

impl VulkanBuffer {
    pub fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        desc: &BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<Self> {
        let (usage, location) = buffer_usage(desc.usage);
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { device.create_buffer(&buffer_info, None) }.context("Failed to create buffer")?;
        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };

        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate buffer memory")?;

        unsafe { device.bind_buffer_memory(raw, allocation.memory(), allocation.offset()) }
            .context("Failed to bind buffer memory")?;

        let mut buffer = Self {
            raw,
            size: desc.size,
            allocation,
        };
        if let Some(data) = data {
            buffer.write(0, data)?;
        }
        Ok(buffer)
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .context("Buffer memory is not host visible")?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        unsafe { device.destroy_buffer(self.raw, None) };
        free(allocator, self.allocation);
    }
}

impl ImageAllocation {
    #[allow(clippy::too_many_arguments)]
    fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", name))?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate image memory")?;

        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .context("Failed to bind image memory")?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { device.create_image_view(&view_info, None) }
            .context("Failed to create image view")?;

        Ok(Self { image, view, allocation })
    }

    fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        free(allocator, self.allocation);
    }
}

impl VulkanTexture {
    pub fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        desc: &TextureDesc,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let image = ImageAllocation::new(
            device,
            allocator,
            &desc.name,
            extent,
            TEXTURE_FORMAT,
            1,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;
        Ok(Self { image, sampler, extent })
    }

    /// The sampler is shared and owned by the backend.
    pub fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        self.image.destroy(device, allocator);
    }
}

impl VulkanFramebuffer {
    pub fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        desc: &FramebufferDesc,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        let extent = vk::Extent2D {
            width: desc.extent.width,
            height: desc.extent.height,
        };
        let format = vk_format(desc.format);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.storage {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let color = ImageAllocation::new(
            device,
            allocator,
            &desc.name,
            extent,
            format,
            desc.mip_levels,
            usage,
            vk::ImageAspectFlags::COLOR,
        )?;

        let depth = if desc.depth {
            let depth = ImageAllocation::new(
                device,
                allocator,
                &format!("{} depth", desc.name),
                extent,
                DEPTH_FORMAT,
                1,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
            );
            match depth {
                Ok(depth) => Some(depth),
                Err(err) => {
                    color.destroy(device, allocator);
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Self {
            color,
            depth,
            format,
            extent,
            sampler,
        })
    }

    pub fn depth_image(&self) -> vk::Image {
        match &self.depth {
            Some(depth) => depth.image,
            None => fatal("depth barrier on a framebuffer without a depth attachment"),
        }
    }

    pub fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        self.color.destroy(device, allocator);
        if let Some(depth) = self.depth {
            depth.destroy(device, allocator);
        }
    }
}

pub fn create_sampler(device: &ash::Device, filter: Filter) -> Result<vk::Sampler> {
    let filter = match filter {
        Filter::Linear => vk::Filter::LINEAR,
        Filter::Nearest => vk::Filter::NEAREST,
    };
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_lod(vk::LOD_CLAMP_NONE);
    unsafe { device.create_sampler(&sampler_info, None) }.context("Failed to create sampler")
}

fn free(allocator: &mut Allocator, allocation: Allocation) {
    if let Err(err) = allocator.free(allocation) {
        log::error!("Failed to free allocation: {}", err);
    }
}
