// Scripted backend for tests
//
// Every call is appended to `events`. Fences complete instantly on submit,
// waiting on a fence that was reset but never submitted panics (that would
// hang a real device). Acquire and present results can be scripted.

use std::collections::VecDeque;

use anyhow::Result;

use super::{Acquire, Backend, DescriptorWrite, PassTarget, Present};
use crate::command::{Command, NativeCommand, NativeTable};
use crate::frame::FrameSlot;
use crate::registry::{RawResource, ResourceKind, ResourceRegistry};
use crate::resource::{
    BufferDesc, ComputePipelineDesc, DescriptorSetDesc, Extent, FramebufferDesc,
    GraphicsPipelineDesc, RenderPassDesc, TextureDesc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockObject(pub u32);

/// Payload emitted by `texture_upload`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockUpload {
    pub staging: MockObject,
    pub texture: MockObject,
    pub extent: Extent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WaitFence(usize),
    ResetFence(usize),
    Acquire(usize),
    RecreateSwapchain(Extent),
    WaitIdle,
    AllocateSecondary { slot: usize, count: usize },
    BeginSecondary { cb: MockObject, pass: Option<MockObject> },
    EndCommands(MockObject),
    Record { cb: MockObject, name: &'static str },
    Upload { cb: MockObject, upload: MockUpload },
    BeginPrimary(usize),
    BeginRenderPass(MockObject),
    ExecuteSecondary(MockObject),
    EndRenderPass,
    SubmitFrame(usize),
    Present { slot: usize, image_index: u32 },
    BeginImmediate,
    SubmitImmediate,
    Create(ResourceKind, MockObject),
    WriteBuffer(MockObject),
    WriteDescriptor { set: MockObject, binding: u32 },
    Destroy(MockObject),
    DestroyDevice,
}

pub struct MockBackend {
    pub events: Vec<Event>,
    pub extent: Extent,
    pub image_count: u32,
    pub acquire_script: VecDeque<Acquire>,
    pub present_script: VecDeque<Present>,
    /// Swapchain image of every frame submission, in order.
    pub submitted_images: Vec<u32>,
    frames: usize,
    fences: Vec<bool>,
    next_id: u32,
    next_image: u32,
    swapchain: MockObject,
}

impl MockBackend {
    pub fn new(frames: usize) -> Self {
        Self {
            events: Vec::new(),
            extent: Extent::new(800, 600),
            image_count: 3,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submitted_images: Vec::new(),
            frames,
            fences: vec![true; frames],
            next_id: 1000,
            next_image: 0,
            swapchain: MockObject(999),
        }
    }

    /// Objects passed to `destroy`, in order.
    pub fn destroyed(&self) -> Vec<MockObject> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Destroy(object) => Some(*object),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    fn alloc(&mut self) -> MockObject {
        self.next_id += 1;
        MockObject(self.next_id)
    }

    fn created(&mut self, kind: ResourceKind) -> MockObject {
        let object = self.alloc();
        self.events.push(Event::Create(kind, object));
        object
    }

    fn record_upload(backend: &mut MockBackend, cb: MockObject, upload: &MockUpload) {
        backend.events.push(Event::Upload { cb, upload: *upload });
    }
}

impl Backend for MockBackend {
    type CommandBuffer = MockObject;
    type Buffer = MockObject;
    type Texture = MockObject;
    type Framebuffer = MockObject;
    type RenderPass = MockObject;
    type Pipeline = MockObject;
    type DescriptorSet = MockObject;
    type Swapchain = MockObject;

    fn native_table() -> NativeTable<Self> {
        NativeTable::new().with::<MockUpload>(MockBackend::record_upload)
    }

    fn frames_in_flight(&self) -> usize {
        self.frames
    }

    fn drawable_extent(&self) -> Extent {
        self.extent
    }

    fn wait_for_fence(&mut self, slot: FrameSlot) -> Result<()> {
        assert!(
            self.fences[slot.index()],
            "waiting on fence {} that will never signal",
            slot.index()
        );
        self.events.push(Event::WaitFence(slot.index()));
        Ok(())
    }

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
        self.fences[slot.index()] = false;
        self.events.push(Event::ResetFence(slot.index()));
        Ok(())
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> Result<Acquire> {
        self.events.push(Event::Acquire(slot.index()));
        if let Some(scripted) = self.acquire_script.pop_front() {
            return Ok(scripted);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(Acquire::Image { index, suboptimal: false })
    }

    fn recreate_swapchain(&mut self, extent: Extent) -> Result<Option<MockObject>> {
        self.events.push(Event::RecreateSwapchain(extent));
        self.extent = extent;
        let fresh = self.alloc();
        Ok(Some(std::mem::replace(&mut self.swapchain, fresh)))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.events.push(Event::WaitIdle);
        Ok(())
    }

    fn allocate_secondary(&mut self, slot: FrameSlot, count: usize) -> Result<Vec<MockObject>> {
        self.events.push(Event::AllocateSecondary { slot: slot.index(), count });
        Ok((0..count).map(|_| self.alloc()).collect())
    }

    fn begin_secondary(&mut self, cb: MockObject, pass: Option<&MockObject>, _image_index: u32) -> Result<()> {
        self.events.push(Event::BeginSecondary { cb, pass: pass.copied() });
        Ok(())
    }

    fn end_commands(&mut self, cb: MockObject) -> Result<()> {
        self.events.push(Event::EndCommands(cb));
        Ok(())
    }

    fn record(&mut self, cb: MockObject, command: &Command, registry: &ResourceRegistry<Self>) {
        // Resolve keys the same way a real backend would
        match command {
            Command::BindPipeline { pipeline, .. } => {
                registry.pipeline(*pipeline);
            }
            Command::PushConstants(pc) => {
                registry.pipeline(pc.pipeline);
            }
            Command::BindDescriptorSet { pipeline, set, .. } => {
                registry.pipeline(*pipeline);
                registry.descriptor_set(*set);
            }
            Command::BindVertexBuffers(buffers) => {
                for buffer in buffers {
                    registry.buffer(*buffer);
                }
            }
            Command::BindIndexBuffer(buffer) => {
                registry.buffer(*buffer);
            }
            Command::ClearImage { image, .. } | Command::ImageMemoryBarrier { image, .. } => {
                registry.image(*image);
            }
            Command::CopyBuffer { src, dst, .. } => {
                registry.buffer(*src);
                registry.buffer(*dst);
            }
            Command::CopyImageToBuffer { image, buffer } => {
                registry.image(*image);
                registry.buffer(*buffer);
            }
            Command::BufferMemoryBarrier { buffer, .. } => {
                registry.buffer(*buffer);
            }
            _ => {}
        }
        self.events.push(Event::Record { cb, name: command.name() });
    }

    fn begin_primary(&mut self, slot: FrameSlot) -> Result<MockObject> {
        self.events.push(Event::BeginPrimary(slot.index()));
        Ok(MockObject(slot.index() as u32))
    }

    fn begin_render_pass(&mut self, _primary: MockObject, pass: &MockObject, _image_index: u32) {
        self.events.push(Event::BeginRenderPass(*pass));
    }

    fn execute_secondary(&mut self, _primary: MockObject, secondary: MockObject) {
        self.events.push(Event::ExecuteSecondary(secondary));
    }

    fn end_render_pass(&mut self, _primary: MockObject) {
        self.events.push(Event::EndRenderPass);
    }

    fn submit_frame(&mut self, slot: FrameSlot, image_index: u32, _primary: MockObject) -> Result<()> {
        self.fences[slot.index()] = true;
        self.submitted_images.push(image_index);
        self.events.push(Event::SubmitFrame(slot.index()));
        Ok(())
    }

    fn present(&mut self, slot: FrameSlot, image_index: u32) -> Result<Present> {
        self.events.push(Event::Present { slot: slot.index(), image_index });
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(Present::Presented { suboptimal: false }))
    }

    fn begin_immediate(&mut self) -> Result<MockObject> {
        self.events.push(Event::BeginImmediate);
        Ok(self.alloc())
    }

    fn submit_immediate(&mut self, _cb: MockObject) -> Result<()> {
        self.events.push(Event::SubmitImmediate);
        Ok(())
    }

    fn create_buffer(&mut self, _desc: &BufferDesc, _data: Option<&[u8]>) -> Result<MockObject> {
        Ok(self.created(ResourceKind::Buffer))
    }

    fn write_buffer(&mut self, buffer: &mut MockObject, _offset: u64, _data: &[u8]) -> Result<()> {
        self.events.push(Event::WriteBuffer(*buffer));
        Ok(())
    }

    fn create_texture(&mut self, _desc: &TextureDesc) -> Result<MockObject> {
        Ok(self.created(ResourceKind::Texture))
    }

    fn texture_upload(&self, staging: &MockObject, texture: &MockObject, extent: Extent) -> NativeCommand {
        NativeCommand::new(MockUpload {
            staging: *staging,
            texture: *texture,
            extent,
        })
    }

    fn create_framebuffer(&mut self, _desc: &FramebufferDesc) -> Result<MockObject> {
        Ok(self.created(ResourceKind::Framebuffer))
    }

    fn create_render_pass(&mut self, _desc: &RenderPassDesc, _target: PassTarget<'_, Self>) -> Result<MockObject> {
        Ok(self.created(ResourceKind::RenderPass))
    }

    fn create_descriptor_set(&mut self, _desc: &DescriptorSetDesc) -> Result<MockObject> {
        Ok(self.created(ResourceKind::DescriptorSet))
    }

    fn write_descriptor_set(&mut self, set: &MockObject, binding: u32, _write: DescriptorWrite<'_, Self>) -> Result<()> {
        self.events.push(Event::WriteDescriptor { set: *set, binding });
        Ok(())
    }

    fn create_graphics_pipeline(&mut self, _desc: &GraphicsPipelineDesc, _pass: &MockObject) -> Result<MockObject> {
        Ok(self.created(ResourceKind::Pipeline))
    }

    fn create_compute_pipeline(&mut self, _desc: &ComputePipelineDesc) -> Result<MockObject> {
        Ok(self.created(ResourceKind::Pipeline))
    }

    fn destroy(&mut self, raw: RawResource<Self>) {
        let object = match raw {
            RawResource::Buffer(o)
            | RawResource::Texture(o)
            | RawResource::Framebuffer(o)
            | RawResource::RenderPass(o)
            | RawResource::Pipeline(o)
            | RawResource::DescriptorSet(o)
            | RawResource::Swapchain(o) => o,
        };
        self.events.push(Event::Destroy(object));
    }

    fn destroy_device(&mut self) {
        self.events.push(Event::DestroyDevice);
    }
}
