// Descriptor sets
//
// Each set owns its layout and is carved from one shared pool created with
// FREE_DESCRIPTOR_SET, so sets can be returned individually when the
// destruction queue drains.

use anyhow::{Context, Result};
use ash::vk;

use super::shader::vk_stages;
use crate::resource::{BindingKind, DescriptorSetDesc};

const POOL_MAX_SETS: u32 = 256;
const POOL_DESCRIPTORS_PER_KIND: u32 = 512;

pub struct VulkanDescriptorSet {
    pub raw: vk::DescriptorSet,
    pub layout: vk::DescriptorSetLayout,
}

pub fn vk_descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

pub fn create_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let pool_sizes = [
        BindingKind::UniformBuffer,
        BindingKind::StorageBuffer,
        BindingKind::SampledImage,
        BindingKind::StorageImage,
    ]
    .map(|kind| vk::DescriptorPoolSize {
        ty: vk_descriptor_type(kind),
        descriptor_count: POOL_DESCRIPTORS_PER_KIND,
    });

    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(POOL_MAX_SETS)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }.context("Failed to create descriptor pool")
}

pub fn create_set_layout(device: &ash::Device, desc: &DescriptorSetDesc) -> Result<vk::DescriptorSetLayout> {
    let bindings: Vec<_> = desc
        .bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding.binding)
                .descriptor_type(vk_descriptor_type(binding.kind))
                .descriptor_count(1)
                .stage_flags(vk_stages(binding.stages))
                .build()
        })
        .collect();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .with_context(|| format!("Failed to create set layout for '{}'", desc.name))
}

impl VulkanDescriptorSet {
    pub fn new(device: &ash::Device, pool: vk::DescriptorPool, desc: &DescriptorSetDesc) -> Result<Self> {
        let layout = create_set_layout(device, desc)?;
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(Self { raw: sets[0], layout }),
            Err(err) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                Err(err).with_context(|| format!("Failed to allocate descriptor set '{}'", desc.name))
            }
        }
    }

    pub fn write_buffer(&self, device: &ash::Device, binding: u32, ty: vk::DescriptorType, buffer: vk::Buffer) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.raw)
            .dst_binding(binding)
            .descriptor_type(ty)
            .buffer_info(&buffer_info)
            .build();
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    pub fn write_image(
        &self,
        device: &ash::Device,
        binding: u32,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.raw)
            .dst_binding(binding)
            .descriptor_type(ty)
            .image_info(&image_info)
            .build();
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    pub fn destroy(self, device: &ash::Device, pool: vk::DescriptorPool) {
        unsafe {
            if let Err(err) = device.free_descriptor_sets(pool, &[self.raw]) {
                log::error!("Failed to free descriptor set: {}", err);
            }
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
