// Backend seam
//
// The frame loop, registry and submission engine are written once against
// this trait. A backend owns the device, the swapchain, per-slot sync objects
// and command pools; everything it creates for the application is handed back
// as a plain object that the registry tracks and `destroy` later consumes.
//
// Recording calls (`record`, `begin_render_pass`, ...) cannot fail on the
// device side; anything that talks to the driver returns `anyhow::Result`.

#[cfg(test)]
pub mod mock;
pub mod vulkan;

use std::fmt;

use anyhow::Result;

use crate::command::{Command, NativeCommand, NativeTable};
use crate::frame::FrameSlot;
use crate::registry::{RawResource, ResourceRegistry};
use crate::resource::{
    BufferDesc, ComputePipelineDesc, DescriptorSetDesc, Extent, FramebufferDesc,
    GraphicsPipelineDesc, RenderPassDesc, TextureDesc,
};

pub use vulkan::VulkanBackend;

/// Outcome of acquiring the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Presented { suboptimal: bool },
    OutOfDate,
}

/// What a render pass object is built against.
pub enum PassTarget<'a, B: Backend> {
    /// One framebuffer per swapchain image; rebuilt whenever the swapchain is.
    Swapchain,
    Framebuffer(&'a B::Framebuffer, &'a FramebufferDesc),
}

/// A resolved descriptor write.
pub enum DescriptorWrite<'a, B: Backend> {
    UniformBuffer(&'a B::Buffer),
    StorageBuffer(&'a B::Buffer),
    Texture(&'a B::Texture),
    Attachment(&'a B::Framebuffer),
    StorageAttachment(&'a B::Framebuffer),
}

pub trait Backend: Sized + 'static {
    type CommandBuffer: Copy + fmt::Debug + PartialEq;
    type Buffer;
    type Texture;
    type Framebuffer;
    type RenderPass;
    type Pipeline;
    type DescriptorSet;
    /// A swapchain that was replaced and awaits destruction.
    type Swapchain;

    /// Handlers for the native payloads this backend emits.
    fn native_table() -> NativeTable<Self>;

    fn frames_in_flight(&self) -> usize;

    /// Current size of the presentation surface.
    fn drawable_extent(&self) -> Extent;

    // ---- frame synchronization ----

    fn wait_for_fence(&mut self, slot: FrameSlot) -> Result<()>;
    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()>;
    fn acquire_image(&mut self, slot: FrameSlot) -> Result<Acquire>;

    /// Build a swapchain for `extent` and return the one it replaces.
    fn recreate_swapchain(&mut self, extent: Extent) -> Result<Option<Self::Swapchain>>;

    fn wait_idle(&mut self) -> Result<()>;

    // ---- command buffers ----

    fn allocate_secondary(&mut self, slot: FrameSlot, count: usize) -> Result<Vec<Self::CommandBuffer>>;

    /// Begin a secondary buffer. Inside a render pass it inherits `pass` and
    /// the framebuffer that belongs to `image_index`.
    fn begin_secondary(
        &mut self,
        cb: Self::CommandBuffer,
        pass: Option<&Self::RenderPass>,
        image_index: u32,
    ) -> Result<()>;

    fn end_commands(&mut self, cb: Self::CommandBuffer) -> Result<()>;

    /// Translate one command. Keys are resolved through `registry`; a key
    /// that is no longer registered is fatal.
    fn record(&mut self, cb: Self::CommandBuffer, command: &Command, registry: &ResourceRegistry<Self>);

    fn begin_primary(&mut self, slot: FrameSlot) -> Result<Self::CommandBuffer>;
    fn begin_render_pass(&mut self, primary: Self::CommandBuffer, pass: &Self::RenderPass, image_index: u32);
    fn execute_secondary(&mut self, primary: Self::CommandBuffer, secondary: Self::CommandBuffer);
    fn end_render_pass(&mut self, primary: Self::CommandBuffer);

    /// End `primary` and submit it, signaling the slot's fence. Presentation
    /// of `image_index` waits on what this submission signals.
    fn submit_frame(&mut self, slot: FrameSlot, image_index: u32, primary: Self::CommandBuffer) -> Result<()>;
    fn present(&mut self, slot: FrameSlot, image_index: u32) -> Result<Present>;

    /// One-shot primary for blocking submissions.
    fn begin_immediate(&mut self) -> Result<Self::CommandBuffer>;
    /// Submit, wait for the queue to go idle, then free the buffer.
    fn submit_immediate(&mut self, cb: Self::CommandBuffer) -> Result<()>;

    // ---- resources ----

    fn create_buffer(&mut self, desc: &BufferDesc, data: Option<&[u8]>) -> Result<Self::Buffer>;
    fn write_buffer(&mut self, buffer: &mut Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Self::Texture>;

    /// Native command copying a staging buffer into mip 0 of `texture`.
    fn texture_upload(&self, staging: &Self::Buffer, texture: &Self::Texture, extent: Extent) -> NativeCommand;

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Self::Framebuffer>;
    fn create_render_pass(&mut self, desc: &RenderPassDesc, target: PassTarget<'_, Self>) -> Result<Self::RenderPass>;
    fn create_descriptor_set(&mut self, desc: &DescriptorSetDesc) -> Result<Self::DescriptorSet>;
    fn write_descriptor_set(
        &mut self,
        set: &Self::DescriptorSet,
        binding: u32,
        write: DescriptorWrite<'_, Self>,
    ) -> Result<()>;
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
        pass: &Self::RenderPass,
    ) -> Result<Self::Pipeline>;
    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<Self::Pipeline>;

    /// Release a retired object. Only called once its last use has completed.
    fn destroy(&mut self, raw: RawResource<Self>);

    /// Tear down sync objects, pools, the swapchain and the device itself.
    fn destroy_device(&mut self);
}
