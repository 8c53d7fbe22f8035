// Command translation
//
// Turns recorded `Command`s into vkCmd* calls. Every key is resolved through
// the registry at this point, so a resource that was released before its
// command list got translated fails here rather than on the GPU.

use ash::vk;

use super::memory::VulkanFramebuffer;
use super::VulkanBackend;
use crate::command::Command;
use crate::error::fatal;
use crate::layout::{self, AttachmentLayout, ImageAspect};
use crate::registry::{ImageRef, ResourceKey, ResourceRegistry};

pub fn vk_layout(layout: AttachmentLayout) -> vk::ImageLayout {
    match layout {
        AttachmentLayout::Undefined => vk::ImageLayout::UNDEFINED,
        AttachmentLayout::General => vk::ImageLayout::GENERAL,
        AttachmentLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AttachmentLayout::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        AttachmentLayout::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        AttachmentLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        AttachmentLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        AttachmentLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// The color image behind a texture or framebuffer, with its size.
fn color_image(image: ImageRef<'_, VulkanBackend>) -> (vk::Image, vk::Extent2D) {
    match image {
        ImageRef::Texture(texture) => (texture.image.image, texture.extent),
        ImageRef::Framebuffer(framebuffer) => (framebuffer.color.image, framebuffer.extent),
    }
}

fn depth_image(image: ImageRef<'_, VulkanBackend>) -> vk::Image {
    match image {
        ImageRef::Framebuffer(framebuffer) => VulkanFramebuffer::depth_image(framebuffer),
        ImageRef::Texture(_) => fatal("depth barrier on a texture"),
    }
}

fn color_range(base_mip: u32, mip_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: base_mip,
        level_count: mip_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl VulkanBackend {
    pub(super) fn translate(
        &self,
        cb: vk::CommandBuffer,
        command: &Command,
        registry: &ResourceRegistry<VulkanBackend>,
    ) {
        let device = &self.ctx.device;

        match command {
            Command::BindPipeline { pipeline, .. } => {
                let pipeline = registry.pipeline(*pipeline);
                unsafe { device.cmd_bind_pipeline(cb, pipeline.bind_point, pipeline.raw) };
            }
            Command::PushConstants(pc) => {
                let pipeline = registry.pipeline(pc.pipeline);
                unsafe {
                    device.cmd_push_constants(
                        cb,
                        pipeline.layout,
                        vk::ShaderStageFlags::from_raw(pc.stages.bits()),
                        pc.offset,
                        pc.bytes(),
                    )
                };
            }
            Command::BindDescriptorSet {
                pipeline,
                set_index,
                set,
                ..
            } => {
                let pipeline = registry.pipeline(*pipeline);
                let set = registry.descriptor_set(*set);
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cb,
                        pipeline.bind_point,
                        pipeline.layout,
                        *set_index,
                        &[set.raw],
                        &[],
                    )
                };
            }
            Command::SetViewport {
                position,
                size,
                min_depth,
                max_depth,
            } => {
                let viewport = vk::Viewport {
                    x: position.x,
                    y: position.y,
                    width: size.x,
                    height: size.y,
                    min_depth: *min_depth,
                    max_depth: *max_depth,
                };
                unsafe { device.cmd_set_viewport(cb, 0, &[viewport]) };
            }
            Command::SetScissor { min, max } => {
                let size = (*max - *min).max(glam::Vec2::ZERO);
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D {
                        x: min.x as i32,
                        y: min.y as i32,
                    },
                    extent: vk::Extent2D {
                        width: size.x as u32,
                        height: size.y as u32,
                    },
                };
                unsafe { device.cmd_set_scissor(cb, 0, &[scissor]) };
            }
            Command::SetLineWidth(width) => unsafe { device.cmd_set_line_width(cb, *width) },
            Command::BindVertexBuffers(keys) => {
                let buffers: Vec<_> = keys.iter().map(|key| registry.buffer(*key).raw).collect();
                let offsets = vec![0; buffers.len()];
                unsafe { device.cmd_bind_vertex_buffers(cb, 0, &buffers, &offsets) };
            }
            Command::BindIndexBuffer(key) => {
                let buffer = registry.buffer(*key);
                unsafe { device.cmd_bind_index_buffer(cb, buffer.raw, 0, vk::IndexType::UINT32) };
            }
            Command::ClearImage {
                image,
                color,
                base_mip,
                mip_count,
            } => {
                let (image, _) = color_image(registry.image(*image));
                let clear = vk::ClearColorValue {
                    float32: color.to_array(),
                };
                unsafe {
                    device.cmd_clear_color_image(
                        cb,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[color_range(*base_mip, *mip_count)],
                    )
                };
            }
            Command::Draw {
                vertex_count,
                first_vertex,
            } => unsafe { device.cmd_draw(cb, *vertex_count, 1, *first_vertex, 0) },
            Command::DrawIndexed {
                index_count,
                vertex_offset,
                first_index,
            } => unsafe { device.cmd_draw_indexed(cb, *index_count, 1, *first_index, *vertex_offset, 0) },
            Command::Dispatch { x, y, z } => unsafe { device.cmd_dispatch(cb, *x, *y, *z) },
            Command::CopyBuffer {
                src,
                dst,
                size,
                src_offset,
                dst_offset,
            } => {
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe {
                    device.cmd_copy_buffer(cb, registry.buffer(*src).raw, registry.buffer(*dst).raw, &[region])
                };
            }
            Command::CopyImageToBuffer { image, buffer } => {
                let (image, extent) = color_image(registry.image(*image));
                let buffer = registry.buffer(*buffer);
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .build();
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        cb,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        buffer.raw,
                        &[region],
                    )
                };
            }
            Command::BufferMemoryBarrier {
                buffer,
                src_access,
                dst_access,
                src_stage,
                dst_stage,
            } => {
                let barrier = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::from_raw(src_access.bits()))
                    .dst_access_mask(vk::AccessFlags::from_raw(dst_access.bits()))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(registry.buffer(*buffer).raw)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build();
                unsafe {
                    device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::from_raw(src_stage.bits()),
                        vk::PipelineStageFlags::from_raw(dst_stage.bits()),
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    )
                };
            }
            Command::ImageMemoryBarrier {
                image,
                aspect,
                old,
                new,
                base_mip,
                mip_count,
            } => self.image_barrier(cb, registry, *image, *aspect, *old, *new, *base_mip, *mip_count),
            Command::Native(native) => fatal(format_args!(
                "native command {} reached the generic translator",
                native.type_name()
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn image_barrier(
        &self,
        cb: vk::CommandBuffer,
        registry: &ResourceRegistry<VulkanBackend>,
        key: ResourceKey,
        aspect: ImageAspect,
        old: AttachmentLayout,
        new: AttachmentLayout,
        base_mip: u32,
        mip_count: u32,
    ) {
        let transition = layout::require(old, new);
        let image = registry.image(key);
        let (image, range) = match aspect {
            ImageAspect::Color => (color_image(image).0, color_range(base_mip, mip_count)),
            ImageAspect::Depth => (
                depth_image(image),
                vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
            ),
        };

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(vk_layout(old))
            .new_layout(vk_layout(new))
            .src_access_mask(vk::AccessFlags::from_raw(transition.src_access.bits()))
            .dst_access_mask(vk::AccessFlags::from_raw(transition.dst_access.bits()))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .build();

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::from_raw(transition.src_stage.bits()),
                vk::PipelineStageFlags::from_raw(transition.dst_stage.bits()),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        };
    }
}
