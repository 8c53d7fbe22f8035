// Vulkan backend
//
// Owns the context, the swapchain, one `FrameSync` per frame slot, a pool for
// immediate submissions, the shared descriptor pool and the samplers handed
// to textures and attachments. Objects created for the application are
// returned by value; the device's registry tracks them and hands them back
// through `destroy` once their last frame has completed.

mod context;
mod descriptor;
mod memory;
mod native;
mod pipeline;
mod shader;
mod swapchain;
mod sync;
mod translate;

pub use context::VulkanContext;
pub use descriptor::VulkanDescriptorSet;
pub use memory::{VulkanBuffer, VulkanFramebuffer, VulkanTexture};
pub use native::CopyBufferToImage;
pub use pipeline::{VulkanPipeline, VulkanRenderPass};
pub use swapchain::RetiredSwapchain;

use anyhow::{Context as _, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use self::swapchain::Swapchain;
use self::sync::FrameSync;
use super::{Acquire, Backend, DescriptorWrite, PassTarget, Present};
use crate::command::{Command, NativeCommand, NativeTable};
use crate::config::{DebugConfig, GraphicsConfig, PresentMode};
use crate::error::fatal;
use crate::frame::FrameSlot;
use crate::registry::{RawResource, ResourceRegistry};
use crate::resource::{
    BufferDesc, ComputePipelineDesc, DescriptorSetDesc, Extent, Filter, FramebufferDesc, GraphicsPipelineDesc,
    RenderPassDesc, TextureDesc,
};

pub struct VulkanBackend {
    ctx: VulkanContext,
    swapchain_loader: ash::extensions::khr::Swapchain,
    swapchain: Option<Swapchain>,
    frames: Vec<FrameSync>,
    immediate_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    linear_sampler: vk::Sampler,
    nearest_sampler: vk::Sampler,
    present_mode: PresentMode,
    /// Last size asked for; used when the surface leaves the choice to us.
    window_extent: Extent,
    destroyed: bool,
}

impl VulkanBackend {
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: Extent,
        graphics: &GraphicsConfig,
        debug: &DebugConfig,
    ) -> Result<Self> {
        let ctx = VulkanContext::new(app_name, display, window, debug.validation_layers)?;
        let device = &ctx.device;
        let swapchain_loader = ash::extensions::khr::Swapchain::new(&ctx.instance, device);

        let swapchain = Swapchain::new(
            device,
            &swapchain_loader,
            &ctx.surface_loader,
            ctx.physical_device,
            ctx.surface,
            extent,
            graphics.present_mode,
            vk::SwapchainKHR::null(),
        )?;

        let frames = (0..graphics.frames_in_flight())
            .map(|_| FrameSync::new(device, ctx.queue_family))
            .collect::<Result<Vec<_>>>()?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let immediate_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create immediate command pool")?;

        let descriptor_pool = descriptor::create_pool(device)?;
        let linear_sampler = memory::create_sampler(device, Filter::Linear)?;
        let nearest_sampler = memory::create_sampler(device, Filter::Nearest)?;

        log::info!("Vulkan backend ready with {} frame slots", frames.len());

        Ok(Self {
            ctx,
            swapchain_loader,
            swapchain: Some(swapchain),
            frames,
            immediate_pool,
            descriptor_pool,
            linear_sampler,
            nearest_sampler,
            present_mode: graphics.present_mode,
            window_extent: extent,
            destroyed: false,
        })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.ctx
    }

    fn sampler(&self, filter: Filter) -> vk::Sampler {
        match filter {
            Filter::Linear => self.linear_sampler,
            Filter::Nearest => self.nearest_sampler,
        }
    }

    fn swapchain(&self) -> &Swapchain {
        match &self.swapchain {
            Some(swapchain) => swapchain,
            None => fatal("swapchain used after the backend was destroyed"),
        }
    }

    fn frame(&self, slot: FrameSlot) -> &FrameSync {
        &self.frames[slot.index()]
    }

    fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        match self.swapchain().render_finished.get(image_index as usize) {
            Some(&semaphore) => semaphore,
            None => fatal(format_args!("swapchain image {} out of range", image_index)),
        }
    }
}

impl Backend for VulkanBackend {
    type CommandBuffer = vk::CommandBuffer;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Framebuffer = VulkanFramebuffer;
    type RenderPass = VulkanRenderPass;
    type Pipeline = VulkanPipeline;
    type DescriptorSet = VulkanDescriptorSet;
    type Swapchain = RetiredSwapchain;

    fn native_table() -> NativeTable<Self> {
        NativeTable::new().with::<CopyBufferToImage>(native::copy_buffer_to_image)
    }

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn drawable_extent(&self) -> Extent {
        let caps = unsafe {
            self.ctx
                .surface_loader
                .get_physical_device_surface_capabilities(self.ctx.physical_device, self.ctx.surface)
        };
        match caps {
            Ok(caps) if caps.current_extent.width != u32::MAX => {
                Extent::new(caps.current_extent.width, caps.current_extent.height)
            }
            Ok(_) => self.window_extent,
            Err(err) => {
                log::warn!("Failed to query surface size: {}", err);
                self.window_extent
            }
        }
    }

    fn wait_for_fence(&mut self, slot: FrameSlot) -> Result<()> {
        let fence = self.frame(slot).in_flight_fence;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for frame fence")
    }

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
        let fence = self.frame(slot).in_flight_fence;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.context("Failed to reset frame fence")
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> Result<Acquire> {
        let semaphore = self.frame(slot).image_available;
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain().raw, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(err) => Err(err).context("vkAcquireNextImageKHR failed"),
        }
    }

    fn recreate_swapchain(&mut self, extent: Extent) -> Result<Option<RetiredSwapchain>> {
        self.ctx.wait_idle()?;
        self.window_extent = extent;

        let old = self.swapchain.take();
        let created = Swapchain::new(
            &self.ctx.device,
            &self.swapchain_loader,
            &self.ctx.surface_loader,
            self.ctx.physical_device,
            self.ctx.surface,
            extent,
            self.present_mode,
            old.as_ref().map_or(vk::SwapchainKHR::null(), |old| old.raw),
        );
        let swapchain = match created {
            Ok(swapchain) => swapchain,
            Err(err) => {
                self.swapchain = old;
                return Err(err);
            }
        };
        self.swapchain = Some(swapchain);

        let mut semaphores = Vec::with_capacity(self.frames.len());
        for frame in &mut self.frames {
            semaphores.push(frame.renew_image_available(&self.ctx.device)?);
        }

        Ok(old.map(|old| old.retire(semaphores)))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn allocate_secondary(&mut self, slot: FrameSlot, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        self.frame(slot).allocate_secondary(&self.ctx.device, count)
    }

    fn begin_secondary(
        &mut self,
        cb: vk::CommandBuffer,
        pass: Option<&VulkanRenderPass>,
        image_index: u32,
    ) -> Result<()> {
        let device = &self.ctx.device;
        let mut inheritance = vk::CommandBufferInheritanceInfo::builder();
        let mut flags = vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        if let Some(pass) = pass {
            inheritance = inheritance
                .render_pass(pass.raw)
                .subpass(0)
                .framebuffer(pass.framebuffer(image_index));
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(flags)
            .inheritance_info(&inheritance);
        unsafe { device.begin_command_buffer(cb, &begin_info) }
            .context("Failed to begin secondary command buffer")?;

        // Dynamic state is not inherited; default to the full attachment
        if let Some(pass) = pass {
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: pass.extent.width as f32,
                height: pass.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            };
            unsafe {
                device.cmd_set_viewport(cb, 0, &[viewport]);
                device.cmd_set_scissor(cb, 0, &[scissor]);
                device.cmd_set_line_width(cb, 1.0);
            }
        }
        Ok(())
    }

    fn end_commands(&mut self, cb: vk::CommandBuffer) -> Result<()> {
        unsafe { self.ctx.device.end_command_buffer(cb) }.context("Failed to end command buffer")
    }

    fn record(&mut self, cb: vk::CommandBuffer, command: &Command, registry: &ResourceRegistry<Self>) {
        self.translate(cb, command, registry);
    }

    fn begin_primary(&mut self, slot: FrameSlot) -> Result<vk::CommandBuffer> {
        let primary = self.frame(slot).primary;
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.ctx.device.begin_command_buffer(primary, &begin_info) }
            .context("Failed to begin primary command buffer")?;
        Ok(primary)
    }

    fn begin_render_pass(&mut self, primary: vk::CommandBuffer, pass: &VulkanRenderPass, image_index: u32) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.raw)
            .framebuffer(pass.framebuffer(image_index))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            })
            .clear_values(&pass.clear_values);
        unsafe {
            self.ctx.device.cmd_begin_render_pass(
                primary,
                &begin_info,
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
        };
    }

    fn execute_secondary(&mut self, primary: vk::CommandBuffer, secondary: vk::CommandBuffer) {
        unsafe { self.ctx.device.cmd_execute_commands(primary, &[secondary]) };
    }

    fn end_render_pass(&mut self, primary: vk::CommandBuffer) {
        unsafe { self.ctx.device.cmd_end_render_pass(primary) };
    }

    fn submit_frame(&mut self, slot: FrameSlot, image_index: u32, primary: vk::CommandBuffer) -> Result<()> {
        let device = &self.ctx.device;
        unsafe { device.end_command_buffer(primary) }.context("Failed to end primary command buffer")?;

        let frame = self.frame(slot);
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished(image_index)];
        let command_buffers = [primary];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe { device.queue_submit(self.ctx.queue, &[submit_info], frame.in_flight_fence) }
            .context("Failed to submit frame")
    }

    fn present(&mut self, _slot: FrameSlot, image_index: u32) -> Result<Present> {
        let wait_semaphores = [self.render_finished(image_index)];
        let swapchains = [self.swapchain().raw];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(self.ctx.queue, &present_info) } {
            Ok(suboptimal) => Ok(Present::Presented { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(err) => Err(err).context("vkQueuePresentKHR failed"),
        }
    }

    fn begin_immediate(&mut self) -> Result<vk::CommandBuffer> {
        let device = &self.ctx.device;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.immediate_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate immediate command buffer")?[0];

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cb, &begin_info) }
            .context("Failed to begin immediate command buffer")?;
        Ok(cb)
    }

    fn submit_immediate(&mut self, cb: vk::CommandBuffer) -> Result<()> {
        let device = &self.ctx.device;
        let command_buffers = [cb];
        let result = unsafe {
            device
                .end_command_buffer(cb)
                .and_then(|()| {
                    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                    device.queue_submit(self.ctx.queue, &[submit_info], vk::Fence::null())
                })
                .and_then(|()| device.queue_wait_idle(self.ctx.queue))
        };
        unsafe { device.free_command_buffers(self.immediate_pool, &command_buffers) };
        result.context("Immediate submission failed")
    }

    fn create_buffer(&mut self, desc: &BufferDesc, data: Option<&[u8]>) -> Result<VulkanBuffer> {
        VulkanBuffer::new(&self.ctx.device, &mut self.ctx.allocator, desc, data)
            .with_context(|| format!("Buffer '{}'", desc.name))
    }

    fn write_buffer(&mut self, buffer: &mut VulkanBuffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.write(offset, data)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<VulkanTexture> {
        let sampler = self.sampler(desc.filter);
        VulkanTexture::new(&self.ctx.device, &mut self.ctx.allocator, desc, sampler)
    }

    fn texture_upload(&self, staging: &VulkanBuffer, texture: &VulkanTexture, extent: Extent) -> NativeCommand {
        NativeCommand::new(CopyBufferToImage {
            buffer: staging.raw,
            image: texture.image.image,
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        })
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<VulkanFramebuffer> {
        let sampler = self.linear_sampler;
        VulkanFramebuffer::new(&self.ctx.device, &mut self.ctx.allocator, desc, sampler)
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc, target: PassTarget<'_, Self>) -> Result<VulkanRenderPass> {
        match target {
            PassTarget::Swapchain => {
                let swapchain = self.swapchain();
                VulkanRenderPass::new(
                    &self.ctx.device,
                    desc,
                    swapchain.format,
                    &swapchain.image_views,
                    None,
                    swapchain.extent,
                )
            }
            PassTarget::Framebuffer(framebuffer, _) => VulkanRenderPass::new(
                &self.ctx.device,
                desc,
                framebuffer.format,
                &[framebuffer.color.view],
                framebuffer.depth.as_ref().map(|depth| depth.view),
                framebuffer.extent,
            ),
        }
    }

    fn create_descriptor_set(&mut self, desc: &DescriptorSetDesc) -> Result<VulkanDescriptorSet> {
        VulkanDescriptorSet::new(&self.ctx.device, self.descriptor_pool, desc)
    }

    fn write_descriptor_set(
        &mut self,
        set: &VulkanDescriptorSet,
        binding: u32,
        write: DescriptorWrite<'_, Self>,
    ) -> Result<()> {
        let device = &self.ctx.device;
        match write {
            DescriptorWrite::UniformBuffer(buffer) => {
                set.write_buffer(device, binding, vk::DescriptorType::UNIFORM_BUFFER, buffer.raw)
            }
            DescriptorWrite::StorageBuffer(buffer) => {
                set.write_buffer(device, binding, vk::DescriptorType::STORAGE_BUFFER, buffer.raw)
            }
            DescriptorWrite::Texture(texture) => set.write_image(
                device,
                binding,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                texture.image.view,
                texture.sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            DescriptorWrite::Attachment(framebuffer) => set.write_image(
                device,
                binding,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                framebuffer.color.view,
                framebuffer.sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            DescriptorWrite::StorageAttachment(framebuffer) => set.write_image(
                device,
                binding,
                vk::DescriptorType::STORAGE_IMAGE,
                framebuffer.color.view,
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
            ),
        }
        Ok(())
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
        pass: &VulkanRenderPass,
    ) -> Result<VulkanPipeline> {
        VulkanPipeline::graphics(&self.ctx.device, desc, pass)
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<VulkanPipeline> {
        VulkanPipeline::compute(&self.ctx.device, desc)
    }

    fn destroy(&mut self, raw: RawResource<Self>) {
        let device = &self.ctx.device;
        match raw {
            RawResource::Buffer(buffer) => buffer.destroy(device, &mut self.ctx.allocator),
            RawResource::Texture(texture) => texture.destroy(device, &mut self.ctx.allocator),
            RawResource::Framebuffer(framebuffer) => framebuffer.destroy(device, &mut self.ctx.allocator),
            RawResource::RenderPass(pass) => pass.destroy(device),
            RawResource::Pipeline(pipeline) => pipeline.destroy(device),
            RawResource::DescriptorSet(set) => set.destroy(device, self.descriptor_pool),
            RawResource::Swapchain(swapchain) => swapchain.destroy(device, &self.swapchain_loader),
        }
    }

    fn destroy_device(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(err) = self.ctx.wait_idle() {
            log::error!("{:#}", err);
        }

        let device = &self.ctx.device;
        unsafe {
            for frame in self.frames.drain(..) {
                frame.destroy(device);
            }
            device.destroy_command_pool(self.immediate_pool, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.linear_sampler, None);
            device.destroy_sampler(self.nearest_sampler, None);
        }
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.retire(Vec::new()).destroy(device, &self.swapchain_loader);
        }

        unsafe { self.ctx.destroy() };
        log::info!("Vulkan backend destroyed");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.destroy_device();
    }
}
