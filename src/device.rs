// Device: the explicit context object
//
// Owns the backend, the registry of live objects, the per-slot destruction
// queues, the submission engine and the frame ring. Resource factories live
// here; the frame loop is implemented in `frame.rs`.
//
// Lifecycle: `Device::new` initializes, `Device::shutdown` tears down. Drop
// runs the teardown if the caller never did.

use anyhow::{Context, Result};
use slotmap::SecondaryMap;

use crate::backend::{Backend, DescriptorWrite, PassTarget};
use crate::command::CommandList;
use crate::config::GraphicsConfig;
use crate::error::fatal;
use crate::fatal_assert;
use crate::frame::{FrameSlot, FrameState};
use crate::free_queue::{FreeEntry, FreeQueue};
use crate::layout::{self, AttachmentLayout};
use crate::registry::{RawResource, ResourceKey, ResourceRegistry};
use crate::resource::{
    BindingKind, Buffer, BufferDesc, BufferUsage, ComputePipelineDesc, DescriptorSet,
    DescriptorSetDesc, Extent, Framebuffer, FramebufferDesc, GraphicsPipelineDesc, LoadOp, Pipeline,
    PipelineKind, RenderPass, RenderPassDesc, RenderTarget, ResourceBinding, Texture, TextureDesc,
};
use crate::submit::SubmissionEngine;

/// What a render pass was built against, kept so it can be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassTargetKey {
    Swapchain,
    Framebuffer(ResourceKey),
}

pub(crate) struct PassRecord {
    desc: RenderPassDesc,
    target: PassTargetKey,
}

pub struct Device<B: Backend> {
    pub(crate) backend: B,
    pub(crate) registry: ResourceRegistry<B>,
    pub(crate) free_queue: FreeQueue<B>,
    pub(crate) engine: SubmissionEngine<B>,
    pub(crate) frame: FrameState,
    passes: SecondaryMap<ResourceKey, PassRecord>,
    shut_down: bool,
}

impl<B: Backend> Device<B> {
    pub fn new(mut backend: B, config: &GraphicsConfig) -> Result<Self> {
        layout::verify_lifecycle();

        let frames = backend.frames_in_flight();
        fatal_assert!(frames > 0, "a device needs at least one frame in flight");

        let engine = SubmissionEngine::new(&mut backend, frames, config.secondary_pool_size)
            .context("Failed to create submission engine")?;

        log::info!("Device ready with {} frames in flight", frames);

        Ok(Self {
            backend,
            registry: ResourceRegistry::new(),
            free_queue: FreeQueue::new(frames),
            engine,
            frame: FrameState::new(frames),
            passes: SecondaryMap::new(),
            shut_down: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Number of objects still owned by application wrappers or not yet
    /// collected.
    pub fn live_resources(&self) -> usize {
        self.registry.len()
    }

    /// How many times `slot`'s destruction queue has been drained.
    pub fn drain_count(&self, slot: FrameSlot) -> u64 {
        self.free_queue.drain_count(slot)
    }

    pub fn pending_frees(&self, slot: FrameSlot) -> usize {
        self.free_queue.pending(slot)
    }

    /// Queue bespoke teardown behind the current frame, or behind the last
    /// submitted one when no frame is open.
    pub fn submit_resource_free(&mut self, free: impl FnOnce(&mut B) + 'static) {
        self.free_queue
            .submit(self.frame.retire_slot(), FreeEntry::Custom(Box::new(free)));
    }

    /// Move every dropped wrapper's object into the current slot's queue.
    pub(crate) fn collect_dropped(&mut self) {
        let slot = self.frame.slot;
        for (key, raw) in self.registry.collect_dropped() {
            self.passes.remove(key);
            self.free_queue.submit(slot, FreeEntry::Resource(raw));
        }
    }

    fn retire(&mut self, raw: RawResource<B>) {
        self.free_queue
            .submit(self.frame.retire_slot(), FreeEntry::Resource(raw));
    }

    // ---- buffers ----

    pub fn create_buffer(&mut self, desc: &BufferDesc, data: Option<&[u8]>) -> Result<Buffer> {
        fatal_assert!(desc.size > 0, "buffer '{}' has zero size", desc.name);
        if let Some(data) = data {
            fatal_assert!(
                desc.usage != BufferUsage::Storage,
                "storage buffer '{}' cannot be created with initial contents",
                desc.name
            );
            fatal_assert!(
                data.len() as u64 <= desc.size,
                "initial data for '{}' is {} bytes, buffer holds {}",
                desc.name,
                data.len(),
                desc.size
            );
        }

        let raw = self
            .backend
            .create_buffer(desc, data)
            .with_context(|| format!("Failed to create buffer '{}'", desc.name))?;
        Ok(Buffer {
            handle: self.registry.track(desc.name.clone(), RawResource::Buffer(raw)),
            size: desc.size,
            usage: desc.usage,
        })
    }

    pub fn create_vertex_buffer<T: bytemuck::Pod>(&mut self, name: &str, vertices: &[T]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let desc = BufferDesc::new(name, bytes.len() as u64, BufferUsage::Vertex);
        self.create_buffer(&desc, Some(bytes))
    }

    pub fn create_index_buffer(&mut self, name: &str, indices: &[u32]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        let desc = BufferDesc::new(name, bytes.len() as u64, BufferUsage::Index);
        self.create_buffer(&desc, Some(bytes))
    }

    pub fn create_uniform_buffer<T: bytemuck::Pod>(&mut self, name: &str, value: &T) -> Result<Buffer> {
        let bytes = bytemuck::bytes_of(value);
        let desc = BufferDesc::new(name, bytes.len() as u64, BufferUsage::Uniform);
        self.create_buffer(&desc, Some(bytes))
    }

    pub fn create_storage_buffer(&mut self, name: &str, size: u64) -> Result<Buffer> {
        self.create_buffer(&BufferDesc::new(name, size, BufferUsage::Storage), None)
    }

    /// Host write into a mapped buffer. The caller is responsible for not
    /// overwriting data a frame in flight still reads.
    pub fn write_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        fatal_assert!(
            buffer.usage != BufferUsage::Storage,
            "storage buffers are device-local and cannot be written from the host"
        );
        fatal_assert!(
            offset
                .checked_add(data.len() as u64)
                .is_some_and(|end| end <= buffer.size),
            "write of {} bytes at offset {} overflows a {} byte buffer",
            data.len(),
            offset,
            buffer.size
        );

        let raw = self.registry.buffer_mut(buffer.key());
        self.backend
            .write_buffer(raw, offset, data)
            .context("Failed to write buffer")
    }

    // ---- images ----

    /// Create an RGBA8 sampled texture and upload `pixels` into it. Blocks
    /// until the upload has finished.
    pub fn create_texture_2d(&mut self, desc: &TextureDesc, pixels: &[u8]) -> Result<Texture> {
        fatal_assert!(
            pixels.len() == desc.byte_size(),
            "texture '{}' expects {} bytes of RGBA8, got {}",
            desc.name,
            desc.byte_size(),
            pixels.len()
        );

        let staging_desc = BufferDesc::new(
            format!("{} staging", desc.name),
            pixels.len() as u64,
            BufferUsage::Staging,
        );
        let staging = self
            .backend
            .create_buffer(&staging_desc, Some(pixels))
            .context("Failed to create staging buffer")?;
        let raw = match self.backend.create_texture(desc) {
            Ok(raw) => raw,
            Err(err) => {
                self.retire(RawResource::Buffer(staging));
                return Err(err.context(format!("Failed to create texture '{}'", desc.name)));
            }
        };

        let texture = Texture {
            handle: self.registry.track(desc.name.clone(), RawResource::Texture(raw)),
            width: desc.width,
            height: desc.height,
        };
        let upload = self.backend.texture_upload(
            &staging,
            self.registry.texture(texture.key()),
            Extent::new(desc.width, desc.height),
        );

        let mut list = self.begin_immediate();
        list.image_memory_barrier(&texture, AttachmentLayout::Undefined, AttachmentLayout::TransferDst, 0, 1);
        list.submit_native(upload);
        list.image_memory_barrier(&texture, AttachmentLayout::TransferDst, AttachmentLayout::ShaderReadOnly, 0, 1);
        let submitted = self.end_immediate(&mut list);

        self.retire(RawResource::Buffer(staging));
        submitted.with_context(|| format!("Failed to upload texture '{}'", desc.name))?;
        Ok(texture)
    }

    pub fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Framebuffer> {
        fatal_assert!(
            !desc.extent.is_empty(),
            "framebuffer '{}' has an empty extent",
            desc.name
        );
        fatal_assert!(desc.mip_levels > 0, "framebuffer '{}' needs at least one mip", desc.name);

        let raw = self
            .backend
            .create_framebuffer(desc)
            .with_context(|| format!("Failed to create framebuffer '{}'", desc.name))?;
        let framebuffer = Framebuffer {
            handle: self.registry.track(desc.name.clone(), RawResource::Framebuffer(raw)),
            desc: desc.clone(),
        };
        self.initialize_layouts(&framebuffer)?;
        Ok(framebuffer)
    }

    /// Rebuild `framebuffer` at a new size. The old images are freed once the
    /// frames that may use them have finished, and render passes drawing into
    /// it are rebuilt.
    pub fn resize_framebuffer(&mut self, framebuffer: &mut Framebuffer, extent: Extent) -> Result<()> {
        fatal_assert!(!extent.is_empty(), "cannot resize framebuffer to an empty extent");
        if framebuffer.desc.extent == extent {
            return Ok(());
        }

        let mut desc = framebuffer.desc.clone();
        desc.extent = extent;
        let raw = self
            .backend
            .create_framebuffer(&desc)
            .with_context(|| format!("Failed to resize framebuffer '{}'", desc.name))?;
        let old = self.registry.replace(framebuffer.key(), RawResource::Framebuffer(raw));
        self.retire(old);
        framebuffer.desc = desc;

        self.initialize_layouts(framebuffer)?;
        let rebuilt = self.rebuild_passes(
            PassTargetKey::Framebuffer(framebuffer.key()),
            Some(&framebuffer.desc),
        )?;
        log::debug!(
            "Resized framebuffer '{}' to {}x{}, rebuilt {} passes",
            framebuffer.desc.name,
            extent.width,
            extent.height,
            rebuilt
        );
        Ok(())
    }

    fn initialize_layouts(&mut self, framebuffer: &Framebuffer) -> Result<()> {
        let desc = &framebuffer.desc;
        if desc.layout == AttachmentLayout::Undefined && !desc.depth {
            return Ok(());
        }

        let mut list = self.begin_immediate();
        if desc.layout != AttachmentLayout::Undefined {
            list.image_memory_barrier(
                framebuffer,
                AttachmentLayout::Undefined,
                desc.layout,
                0,
                desc.mip_levels,
            );
        }
        if desc.depth {
            list.depth_memory_barrier(framebuffer, AttachmentLayout::Undefined, AttachmentLayout::Depth);
        }
        self.end_immediate(&mut list)
    }

    // ---- passes, sets and pipelines ----

    pub fn create_render_pass(&mut self, desc: &RenderPassDesc, target: RenderTarget<'_>) -> Result<RenderPass> {
        let (raw, key) = match target {
            RenderTarget::Swapchain => (
                self.backend.create_render_pass(desc, PassTarget::Swapchain),
                PassTargetKey::Swapchain,
            ),
            RenderTarget::Framebuffer(framebuffer) => {
                let raw_fb = self.registry.framebuffer(framebuffer.key());
                (
                    self.backend
                        .create_render_pass(desc, PassTarget::Framebuffer(raw_fb, &framebuffer.desc)),
                    PassTargetKey::Framebuffer(framebuffer.key()),
                )
            }
        };
        let raw = raw.with_context(|| format!("Failed to create render pass '{}'", desc.name))?;

        let handle = self.registry.track(desc.name.clone(), RawResource::RenderPass(raw));
        self.passes.insert(
            handle.key(),
            PassRecord {
                desc: desc.clone(),
                target: key,
            },
        );
        Ok(RenderPass {
            handle,
            targets_swapchain: key == PassTargetKey::Swapchain,
            clears: desc.load == LoadOp::Clear,
        })
    }

    /// Recreate every render pass built against `target`. Old objects are
    /// retired behind the frames that may still use them.
    pub(crate) fn rebuild_passes(
        &mut self,
        target: PassTargetKey,
        framebuffer: Option<&FramebufferDesc>,
    ) -> Result<usize> {
        let keys: Vec<ResourceKey> = self
            .passes
            .iter()
            .filter(|(_, record)| record.target == target)
            .map(|(key, _)| key)
            .collect();

        for &key in &keys {
            let record = &self.passes[key];
            let pass_target = match (target, framebuffer) {
                (PassTargetKey::Swapchain, _) => PassTarget::Swapchain,
                (PassTargetKey::Framebuffer(fb), Some(desc)) => {
                    PassTarget::Framebuffer(self.registry.framebuffer(fb), desc)
                }
                (PassTargetKey::Framebuffer(_), None) => {
                    fatal("rebuilding a framebuffer pass needs the framebuffer description")
                }
            };
            let raw = self
                .backend
                .create_render_pass(&record.desc, pass_target)
                .with_context(|| format!("Failed to rebuild render pass '{}'", record.desc.name))?;
            let old = self.registry.replace(key, RawResource::RenderPass(raw));
            self.retire(old);
        }
        Ok(keys.len())
    }

    pub fn create_descriptor_set(&mut self, desc: &DescriptorSetDesc) -> Result<DescriptorSet> {
        let raw = self
            .backend
            .create_descriptor_set(desc)
            .with_context(|| format!("Failed to create descriptor set '{}'", desc.name))?;
        Ok(DescriptorSet {
            handle: self.registry.track(desc.name.clone(), RawResource::DescriptorSet(raw)),
            desc: desc.clone(),
        })
    }

    pub fn write_descriptor_set(
        &mut self,
        set: &DescriptorSet,
        binding: u32,
        resource: ResourceBinding<'_>,
    ) -> Result<()> {
        let declared = match set.desc.binding(binding) {
            Some(declared) => declared.kind,
            None => fatal(format_args!(
                "descriptor set '{}' has no binding {}",
                set.desc.name, binding
            )),
        };

        let registry = &self.registry;
        let (kind, write) = match resource {
            ResourceBinding::UniformBuffer(buffer) => (
                BindingKind::UniformBuffer,
                DescriptorWrite::UniformBuffer(registry.buffer(buffer.key())),
            ),
            ResourceBinding::StorageBuffer(buffer) => (
                BindingKind::StorageBuffer,
                DescriptorWrite::StorageBuffer(registry.buffer(buffer.key())),
            ),
            ResourceBinding::Texture(texture) => (
                BindingKind::SampledImage,
                DescriptorWrite::Texture(registry.texture(texture.key())),
            ),
            ResourceBinding::Attachment(framebuffer) => (
                BindingKind::SampledImage,
                DescriptorWrite::Attachment(registry.framebuffer(framebuffer.key())),
            ),
            ResourceBinding::StorageAttachment(framebuffer) => {
                fatal_assert!(
                    framebuffer.desc.storage,
                    "framebuffer '{}' was not created with storage usage",
                    framebuffer.desc.name
                );
                (
                    BindingKind::StorageImage,
                    DescriptorWrite::StorageAttachment(registry.framebuffer(framebuffer.key())),
                )
            }
        };
        fatal_assert!(
            kind == declared,
            "binding {} of '{}' is declared {:?}, got {:?}",
            binding,
            set.desc.name,
            declared,
            kind
        );

        self.backend
            .write_descriptor_set(registry.descriptor_set(set.key()), binding, write)
            .context("Failed to write descriptor set")
    }

    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc, pass: &RenderPass) -> Result<Pipeline> {
        let raw = self
            .backend
            .create_graphics_pipeline(desc, self.registry.render_pass(pass.key()))
            .with_context(|| format!("Failed to create graphics pipeline '{}'", desc.name))?;
        Ok(Pipeline {
            handle: self.registry.track(desc.name.clone(), RawResource::Pipeline(raw)),
            kind: PipelineKind::Graphics,
        })
    }

    pub fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<Pipeline> {
        let raw = self
            .backend
            .create_compute_pipeline(desc)
            .with_context(|| format!("Failed to create compute pipeline '{}'", desc.name))?;
        Ok(Pipeline {
            handle: self.registry.track(desc.name.clone(), RawResource::Pipeline(raw)),
            kind: PipelineKind::Compute,
        })
    }

    // ---- immediate submission ----

    /// Start a list that is executed synchronously by `end_immediate`.
    pub fn begin_immediate(&mut self) -> CommandList {
        let mut list = CommandList::immediate();
        list.begin();
        list
    }

    /// Close `list` if needed, run it and wait for the queue to go idle.
    /// Stalls the device; meant for uploads and setup work.
    pub fn end_immediate(&mut self, list: &mut CommandList) -> Result<()> {
        fatal_assert!(
            list.is_immediate(),
            "end_immediate called with a frame command list"
        );
        if list.is_recording() {
            list.end();
        }
        self.engine
            .submit_immediate(&mut self.backend, &self.registry, list)?;
        list.mark_submitted();
        Ok(())
    }

    // ---- teardown ----

    /// Wait for the device, free everything still alive and destroy the
    /// backend. Wrappers dropped afterwards are ignored.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        log::info!("Shutting down device");

        let idle = self.backend.wait_idle().context("Failed to wait for device idle");

        self.collect_dropped();
        let leaked = self.registry.release_all();
        if !leaked.is_empty() {
            log::warn!("{} resources still alive at shutdown, destroying them", leaked.len());
        }
        let slot = self.frame.slot;
        for (name, raw) in leaked {
            log::debug!("Force-destroying {:?} '{}'", raw.kind(), name);
            self.free_queue.submit(slot, FreeEntry::Resource(raw));
        }
        self.passes.clear();

        let freed = self.free_queue.drain_all(&mut self.backend);
        log::debug!("Released {} objects during shutdown", freed);

        self.backend.destroy_device();
        idle
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Device shutdown failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Event, MockBackend, MockObject};
    use crate::registry::ResourceKind;
    use crate::resource::{DescriptorBinding, ShaderStages};

    fn device() -> Device<MockBackend> {
        Device::new(MockBackend::new(2), &GraphicsConfig::default()).unwrap()
    }

    fn created(device: &Device<MockBackend>, kind: ResourceKind) -> Vec<MockObject> {
        device
            .backend()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Create(k, object) if *k == kind => Some(*object),
                _ => None,
            })
            .collect()
    }

    fn cycle(device: &mut Device<MockBackend>, frames: usize) {
        for _ in 0..frames {
            device.begin_frame().unwrap();
            device.end_frame().unwrap();
        }
    }

    #[test]
    fn dropped_resource_is_freed_exactly_once() {
        let mut device = device();
        let buffer = device.create_vertex_buffer("quad", &[0.0f32; 12]).unwrap();
        let raw = created(&device, ResourceKind::Buffer)[0];
        assert_eq!(device.live_resources(), 1);

        device.begin_frame().unwrap();
        drop(buffer);
        device.end_frame().unwrap();
        assert_eq!(device.live_resources(), 0);

        cycle(&mut device, 6);
        device.shutdown().unwrap();
        assert_eq!(device.backend().destroyed(), vec![raw]);
    }

    #[test]
    fn shutdown_force_releases_live_resources() {
        let mut device = device();
        let buffer = device.create_storage_buffer("particles", 1024).unwrap();
        let set = device
            .create_descriptor_set(&DescriptorSetDesc::new(
                "sim",
                vec![DescriptorBinding {
                    binding: 0,
                    kind: BindingKind::StorageBuffer,
                    stages: ShaderStages::COMPUTE,
                }],
            ))
            .unwrap();
        device
            .write_descriptor_set(&set, 0, ResourceBinding::StorageBuffer(&buffer))
            .unwrap();

        device.shutdown().unwrap();
        assert_eq!(device.backend().destroyed().len(), 2);
        assert_eq!(device.backend().events.last(), Some(&Event::DestroyDevice));

        // Late drops are ignored and nothing is destroyed twice
        drop(buffer);
        drop(set);
        device.shutdown().unwrap();
        assert_eq!(device.backend().destroyed().len(), 2);
        assert_eq!(device.backend().count(|e| matches!(e, Event::DestroyDevice)), 1);
    }

    #[test]
    fn texture_upload_runs_immediately_and_defers_staging() {
        let mut device = device();
        let desc = TextureDesc::new("atlas", 2, 2);
        let texture = device.create_texture_2d(&desc, &[255u8; 16]).unwrap();

        let events = &device.backend().events;
        let staging = created(&device, ResourceKind::Buffer)[0];
        assert!(events.contains(&Event::BeginImmediate));
        assert!(events.contains(&Event::SubmitImmediate));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Upload { upload, .. } if upload.staging == staging
        )));
        assert_eq!(
            device.backend().count(|e| matches!(e, Event::Record { name: "image_memory_barrier", .. })),
            2
        );

        // Staging buffer waits for the slot like any other retired object
        assert!(device.backend().destroyed().is_empty());
        assert_eq!(device.pending_frees(FrameSlot::new(0)), 1);
        assert_eq!(texture.extent(), Extent::new(2, 2));
    }

    #[test]
    fn framebuffer_creation_transitions_out_of_undefined() {
        let mut device = device();
        let mut desc = FramebufferDesc::new("scene", Extent::new(64, 64));
        desc.layout = AttachmentLayout::Color;
        desc.depth = true;
        let _fb = device.create_framebuffer(&desc).unwrap();

        assert_eq!(
            device.backend().count(|e| matches!(e, Event::Record { name: "image_memory_barrier", .. })),
            2
        );
        assert_eq!(device.backend().count(|e| matches!(e, Event::SubmitImmediate)), 1);

        let plain = FramebufferDesc::new("plain", Extent::new(8, 8));
        let _plain = device.create_framebuffer(&plain).unwrap();
        assert_eq!(device.backend().count(|e| matches!(e, Event::SubmitImmediate)), 1);
    }

    #[test]
    fn resize_framebuffer_rebuilds_dependent_passes() {
        let mut device = device();
        let mut desc = FramebufferDesc::new("scene", Extent::new(64, 64));
        desc.layout = AttachmentLayout::ShaderReadOnly;
        let mut fb = device.create_framebuffer(&desc).unwrap();
        let pass = device
            .create_render_pass(&RenderPassDesc::offscreen("scene"), RenderTarget::Framebuffer(&fb))
            .unwrap();
        let _swap = device
            .create_render_pass(&RenderPassDesc::swapchain("ui"), RenderTarget::Swapchain)
            .unwrap();
        assert!(!pass.targets_swapchain());

        device.resize_framebuffer(&mut fb, Extent::new(128, 128)).unwrap();
        assert_eq!(fb.extent(), Extent::new(128, 128));
        assert_eq!(created(&device, ResourceKind::Framebuffer).len(), 2);
        assert_eq!(created(&device, ResourceKind::RenderPass).len(), 3);
        assert_eq!(device.pending_frees(FrameSlot::new(0)), 2);
        assert_eq!(device.live_resources(), 3);

        // Same size is a no-op
        device.resize_framebuffer(&mut fb, Extent::new(128, 128)).unwrap();
        assert_eq!(created(&device, ResourceKind::Framebuffer).len(), 2);
    }

    #[test]
    fn resize_between_frames_waits_for_the_last_submitted_frame() {
        let mut device = device();
        let mut fb = device
            .create_framebuffer(&FramebufferDesc::new("scene", Extent::new(64, 64)))
            .unwrap();
        let old = created(&device, ResourceKind::Framebuffer)[0];

        // Slots 0 and 1 both submitted; slot 0 is up next
        cycle(&mut device, 2);
        assert_eq!(device.frame_slot(), FrameSlot::new(0));

        device.resize_framebuffer(&mut fb, Extent::new(32, 32)).unwrap();
        assert_eq!(device.pending_frees(FrameSlot::new(0)), 0);
        assert_eq!(device.pending_frees(FrameSlot::new(1)), 1);

        let ran = std::rc::Rc::new(std::cell::Cell::new(false));
        let flag = ran.clone();
        device.submit_resource_free(move |_| flag.set(true));

        cycle(&mut device, 1);
        assert!(device.backend().destroyed().is_empty());
        assert!(!ran.get());

        device.begin_frame().unwrap();
        let events = &device.backend().events;
        let waited = events.iter().rposition(|e| *e == Event::WaitFence(1));
        let destroyed = events.iter().position(|e| *e == Event::Destroy(old));
        assert!(waited.is_some());
        assert!(destroyed > waited);
        assert!(ran.get());
        device.end_frame().unwrap();
    }

    #[test]
    fn write_descriptor_checks_declared_kind() {
        let mut device = device();
        let buffer = device.create_uniform_buffer("camera", &[0.0f32; 16]).unwrap();
        let set = device
            .create_descriptor_set(&DescriptorSetDesc::new(
                "camera",
                vec![DescriptorBinding {
                    binding: 0,
                    kind: BindingKind::UniformBuffer,
                    stages: ShaderStages::VERTEX,
                }],
            ))
            .unwrap();

        device
            .write_descriptor_set(&set, 0, ResourceBinding::UniformBuffer(&buffer))
            .unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = device.write_descriptor_set(&set, 0, ResourceBinding::StorageBuffer(&buffer));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn write_buffer_reaches_the_backend() {
        let mut device = device();
        let buffer = device.create_uniform_buffer("time", &0.0f32).unwrap();
        device.write_buffer(&buffer, 0, bytemuck::bytes_of(&1.5f32)).unwrap();
        assert_eq!(device.backend().count(|e| matches!(e, Event::WriteBuffer(_))), 1);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn write_past_the_end_is_fatal() {
        let mut device = device();
        let buffer = device.create_uniform_buffer("time", &0.0f32).unwrap();
        let _ = device.write_buffer(&buffer, 2, &[0u8; 4]);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn write_at_huge_offset_is_fatal() {
        let mut device = device();
        let buffer = device.create_uniform_buffer("time", &0.0f32).unwrap();
        let _ = device.write_buffer(&buffer, u64::MAX - 1, &[0u8; 4]);
    }

    #[test]
    #[should_panic(expected = "cannot be created with initial contents")]
    fn storage_buffer_with_data_is_fatal() {
        let mut device = device();
        let desc = BufferDesc::new("bad", 16, BufferUsage::Storage);
        let _ = device.create_buffer(&desc, Some(&[0u8; 16]));
    }
}
