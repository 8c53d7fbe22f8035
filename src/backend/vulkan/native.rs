// Native payloads emitted by this backend

use ash::vk;

use super::VulkanBackend;

/// Copy a tightly packed RGBA8 staging buffer into mip 0 of `image`, which
/// must be in TRANSFER_DST_OPTIMAL.
#[derive(Debug, Clone, Copy)]
pub struct CopyBufferToImage {
    pub buffer: vk::Buffer,
    pub image: vk::Image,
    pub extent: vk::Extent2D,
}

pub fn copy_buffer_to_image(backend: &mut VulkanBackend, cb: vk::CommandBuffer, upload: &CopyBufferToImage) {
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: upload.extent.width,
            height: upload.extent.height,
            depth: 1,
        })
        .build();

    unsafe {
        backend.ctx.device.cmd_copy_buffer_to_image(
            cb,
            upload.buffer,
            upload.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        )
    };
}
