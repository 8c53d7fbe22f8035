// Backend-agnostic command recording
//
// A `CommandList` is an ordered set of scopes. A scope is either general
// (transfers, compute, barriers) or bound to one render pass. Nothing here
// touches the device: the submission engine translates the recorded scopes
// into backend command buffers later.

mod entry;
mod native;

pub use entry::{Command, PushConstants, MAX_PUSH_CONSTANT_SIZE};
pub use native::{NativeCommand, NativeTable};

use std::any::{Any, TypeId};
use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::error::fatal;
use crate::fatal_assert;
use crate::layout::{self, Access, AttachmentLayout, ImageAspect, Stages};
use crate::registry::ResourceKey;
use crate::resource::{
    Buffer, DescriptorSet, ImageResource, Pipeline, PipelineKind, RenderPass, ShaderStages,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Idle,
    Recording,
    Closed,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    General,
    RenderPass,
}

#[derive(Debug, Clone)]
pub struct CommandScope {
    kind: ScopeKind,
    render_pass: Option<ResourceKey>,
    clears: bool,
    commands: Vec<Command>,
}

impl CommandScope {
    fn general() -> Self {
        Self {
            kind: ScopeKind::General,
            render_pass: None,
            clears: false,
            commands: Vec::new(),
        }
    }

    fn inside(pass: &RenderPass) -> Self {
        Self {
            kind: ScopeKind::RenderPass,
            render_pass: Some(pass.key()),
            clears: pass.clears(),
            commands: Vec::new(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn render_pass(&self) -> Option<ResourceKey> {
        self.render_pass
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// An empty scope still matters when it begins a clearing pass.
    pub fn has_work(&self) -> bool {
        !self.commands.is_empty() || self.clears
    }
}

#[derive(Debug, Clone, Copy)]
struct BoundPipeline {
    key: ResourceKey,
    kind: PipelineKind,
}

/// Recorded unit of device work.
#[derive(Debug, Clone)]
pub struct CommandList {
    state: ListState,
    immediate: bool,
    scopes: Vec<CommandScope>,
    current: CommandScope,
    bound: Option<BoundPipeline>,
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandList {
    pub fn new() -> Self {
        Self {
            state: ListState::Idle,
            immediate: false,
            scopes: Vec::new(),
            current: CommandScope::general(),
            bound: None,
        }
    }

    /// List for immediate, blocking submission. Render passes are not
    /// allowed in it.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::new()
        }
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == ListState::Recording
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    /// Closed scopes, in recorded order. Empty until `end()`.
    pub fn scopes(&self) -> &[CommandScope] {
        &self.scopes
    }

    pub fn begin(&mut self) {
        fatal_assert!(
            self.state != ListState::Recording,
            "CommandList::begin called on a list that is already recording"
        );
        self.scopes.clear();
        self.current = CommandScope::general();
        self.bound = None;
        self.state = ListState::Recording;
    }

    pub fn end(&mut self) {
        fatal_assert!(
            self.state == ListState::Recording,
            "CommandList::end called on a list that is not recording ({:?})",
            self.state
        );
        let trailing = std::mem::replace(&mut self.current, CommandScope::general());
        self.scopes.push(trailing);
        self.bound = None;
        self.state = ListState::Closed;
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.state = ListState::Submitted;
    }

    pub fn begin_render_pass(&mut self, pass: &RenderPass) {
        self.require_recording("begin_render_pass");
        fatal_assert!(
            !self.immediate,
            "cannot begin a render pass in an immediate command list"
        );
        fatal_assert!(
            self.current.kind == ScopeKind::General,
            "begin_render_pass called inside another render pass"
        );
        self.open_scope(CommandScope::inside(pass));
    }

    pub fn end_render_pass(&mut self) {
        self.require_recording("end_render_pass");
        fatal_assert!(
            self.current.kind == ScopeKind::RenderPass,
            "end_render_pass called outside a render pass"
        );
        self.open_scope(CommandScope::general());
    }

    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.bound = Some(BoundPipeline {
            key: pipeline.key(),
            kind: pipeline.kind(),
        });
        self.push(Command::BindPipeline {
            pipeline: pipeline.key(),
            kind: pipeline.kind(),
        });
    }

    pub fn push_constants(&mut self, stages: ShaderStages, data: &[u8], offset: u32) {
        let bound = self.require_pipeline("push constants");
        fatal_assert!(
            data.len() <= MAX_PUSH_CONSTANT_SIZE,
            "push constant size must be <= {} bytes, got {}",
            MAX_PUSH_CONSTANT_SIZE,
            data.len()
        );

        let mut inline = [0u8; MAX_PUSH_CONSTANT_SIZE];
        inline[..data.len()].copy_from_slice(data);

        self.push(Command::PushConstants(PushConstants {
            pipeline: bound.key,
            kind: bound.kind,
            stages,
            offset,
            size: data.len() as u32,
            data: inline,
        }));
    }

    pub fn push_constants_value<T: bytemuck::Pod>(&mut self, stages: ShaderStages, value: &T) {
        self.push_constants(stages, bytemuck::bytes_of(value), 0);
    }

    pub fn bind_descriptor_set(&mut self, set_index: u32, set: &DescriptorSet) {
        let bound = self.require_pipeline("bind a descriptor set");
        self.push(Command::BindDescriptorSet {
            pipeline: bound.key,
            kind: bound.kind,
            set_index,
            set: set.key(),
        });
    }

    pub fn set_viewport(&mut self, position: Vec2, size: Vec2, min_depth: f32, max_depth: f32) {
        self.require_graphics("set viewport");
        self.push(Command::SetViewport {
            position,
            size,
            min_depth,
            max_depth,
        });
    }

    pub fn set_scissor(&mut self, min: Vec2, max: Vec2) {
        self.require_graphics("set scissor");
        self.push(Command::SetScissor { min, max });
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.require_graphics("set line width");
        self.push(Command::SetLineWidth(width));
    }

    pub fn bind_vertex_buffers(&mut self, buffers: &[&Buffer]) {
        self.push(Command::BindVertexBuffers(buffers.iter().map(|b| b.key()).collect()));
    }

    pub fn bind_index_buffer(&mut self, buffer: &Buffer) {
        self.push(Command::BindIndexBuffer(buffer.key()));
    }

    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        self.require_graphics("draw");
        self.push(Command::Draw {
            vertex_count,
            first_vertex,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32, vertex_offset: i32, first_index: u32) {
        self.require_graphics("draw");
        self.push(Command::DrawIndexed {
            index_count,
            vertex_offset,
            first_index,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.require_general("dispatch");
        self.require_compute("dispatch");
        self.push(Command::Dispatch { x, y, z });
    }

    /// Clear a color image outside any render pass. The image is moved to
    /// `TransferDst` for the clear and back to `current` afterwards.
    pub fn clear_image(
        &mut self,
        image: &impl ImageResource,
        color: Vec4,
        current: AttachmentLayout,
        base_mip: u32,
        mip_count: u32,
    ) {
        self.require_recording("clear_image");
        self.require_general("clear an image");

        if current != AttachmentLayout::TransferDst {
            self.image_memory_barrier(image, current, AttachmentLayout::TransferDst, base_mip, mip_count);
        }
        self.push(Command::ClearImage {
            image: image.image_key(),
            color,
            base_mip,
            mip_count,
        });
        if current != AttachmentLayout::TransferDst {
            self.image_memory_barrier(image, AttachmentLayout::TransferDst, current, base_mip, mip_count);
        }
    }

    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, size: u64, src_offset: u64, dst_offset: u64) {
        self.require_general("copy a buffer");
        let fits = |offset: u64, buffer: &Buffer| {
            offset
                .checked_add(size)
                .is_some_and(|end| end <= buffer.size())
        };
        fatal_assert!(
            fits(src_offset, src) && fits(dst_offset, dst),
            "copy_buffer range out of bounds ({} bytes)",
            size
        );
        self.push(Command::CopyBuffer {
            src: src.key(),
            dst: dst.key(),
            size,
            src_offset,
            dst_offset,
        });
    }

    /// Read back mip 0 of a color image. Wrapped in transitions through
    /// `TransferSrc` unless it is already there.
    pub fn copy_image_to_buffer(&mut self, image: &impl ImageResource, buffer: &Buffer, current: AttachmentLayout) {
        self.require_recording("copy_image_to_buffer");
        self.require_general("copy an image");

        if current != AttachmentLayout::TransferSrc {
            self.image_memory_barrier(image, current, AttachmentLayout::TransferSrc, 0, 1);
        }
        self.push(Command::CopyImageToBuffer {
            image: image.image_key(),
            buffer: buffer.key(),
        });
        if current != AttachmentLayout::TransferSrc {
            self.image_memory_barrier(image, AttachmentLayout::TransferSrc, current, 0, 1);
        }
    }

    pub fn buffer_memory_barrier(
        &mut self,
        buffer: &Buffer,
        src_access: Access,
        dst_access: Access,
        src_stage: Stages,
        dst_stage: Stages,
    ) {
        self.require_general("record a buffer barrier");
        self.push(Command::BufferMemoryBarrier {
            buffer: buffer.key(),
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        });
    }

    pub fn image_memory_barrier(
        &mut self,
        image: &impl ImageResource,
        old: AttachmentLayout,
        new: AttachmentLayout,
        base_mip: u32,
        mip_count: u32,
    ) {
        self.image_barrier(image.image_key(), ImageAspect::Color, old, new, base_mip, mip_count);
    }

    /// Barrier on the depth attachment of a framebuffer.
    pub fn depth_memory_barrier(&mut self, image: &impl ImageResource, old: AttachmentLayout, new: AttachmentLayout) {
        self.image_barrier(image.image_key(), ImageAspect::Depth, old, new, 0, 1);
    }

    fn image_barrier(
        &mut self,
        image: ResourceKey,
        aspect: ImageAspect,
        old: AttachmentLayout,
        new: AttachmentLayout,
        base_mip: u32,
        mip_count: u32,
    ) {
        self.require_general("record an image barrier");
        // Reject illegal pairs while the caller is still on the stack.
        layout::require(old, new);
        self.push(Command::ImageMemoryBarrier {
            image,
            aspect,
            old,
            new,
            base_mip,
            mip_count,
        });
    }

    pub fn submit_native_command(&mut self, payload: Arc<dyn Any + Send + Sync>, type_tag: TypeId) {
        self.push(Command::Native(NativeCommand::from_parts(payload, type_tag)));
    }

    pub fn submit_native(&mut self, command: NativeCommand) {
        self.push(Command::Native(command));
    }

    pub fn native<T: Any + Send + Sync>(&mut self, payload: T) {
        self.submit_native(NativeCommand::new(payload));
    }

    fn open_scope(&mut self, next: CommandScope) {
        let finished = std::mem::replace(&mut self.current, next);
        self.scopes.push(finished);
    }

    #[track_caller]
    fn push(&mut self, command: Command) {
        self.require_recording(command.name());
        self.current.commands.push(command);
    }

    #[track_caller]
    fn require_recording(&self, what: &str) {
        if self.state != ListState::Recording {
            fatal(format_args!(
                "{} recorded into a CommandList that is not recording ({:?})",
                what, self.state
            ));
        }
    }

    #[track_caller]
    fn require_general(&self, what: &str) {
        if self.current.kind != ScopeKind::General {
            fatal(format_args!("cannot {} inside a render pass", what));
        }
    }

    #[track_caller]
    fn require_pipeline(&self, what: &str) -> BoundPipeline {
        match self.bound {
            Some(bound) => bound,
            None => fatal(format_args!("cannot {} without binding a pipeline", what)),
        }
    }

    #[track_caller]
    fn require_graphics(&self, what: &str) {
        match self.bound {
            Some(BoundPipeline { kind: PipelineKind::Graphics, .. }) => {}
            _ => fatal(format_args!("cannot {} without binding a graphics pipeline", what)),
        }
    }

    #[track_caller]
    fn require_compute(&self, what: &str) {
        match self.bound {
            Some(BoundPipeline { kind: PipelineKind::Compute, .. }) => {}
            _ => fatal(format_args!("cannot {} without binding a compute pipeline", what)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RawResource, ResourceRegistry};
    use crate::backend::mock::{MockBackend, MockObject};

    struct Fixture {
        registry: ResourceRegistry<MockBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            Self { registry: ResourceRegistry::new() }
        }

        fn pipeline(&mut self, kind: PipelineKind) -> Pipeline {
            Pipeline {
                handle: self.registry.track("pipeline", RawResource::Pipeline(MockObject(1))),
                kind,
            }
        }

        fn pass(&mut self) -> RenderPass {
            RenderPass {
                handle: self.registry.track("pass", RawResource::RenderPass(MockObject(2))),
                targets_swapchain: true,
                clears: true,
            }
        }

        fn buffer(&mut self, size: u64) -> Buffer {
            Buffer {
                handle: self.registry.track("buffer", RawResource::Buffer(MockObject(3))),
                size,
                usage: crate::resource::BufferUsage::Vertex,
            }
        }
    }

    #[test]
    fn begin_opens_general_scope_and_end_closes_it() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Compute);

        let mut list = CommandList::new();
        assert_eq!(list.state(), ListState::Idle);
        list.begin();
        list.bind_pipeline(&pipeline);
        list.dispatch(8, 8, 1);
        list.end();

        assert_eq!(list.state(), ListState::Closed);
        assert_eq!(list.scopes().len(), 1);
        assert_eq!(list.scopes()[0].kind(), ScopeKind::General);
        assert_eq!(list.scopes()[0].commands().len(), 2);
    }

    #[test]
    fn render_pass_splits_scopes() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Graphics);
        let pass = fx.pass();

        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.bind_pipeline(&pipeline);
        list.draw(3, 0);
        list.end_render_pass();
        list.end();

        let kinds: Vec<_> = list.scopes().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![ScopeKind::General, ScopeKind::RenderPass, ScopeKind::General]);
        assert_eq!(list.scopes()[1].render_pass(), Some(pass.key()));
        assert!(list.scopes()[0].is_empty());
        assert!(list.scopes()[2].is_empty());
    }

    #[test]
    fn push_constants_are_inlined() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Graphics);

        let mut list = CommandList::new();
        list.begin();
        list.bind_pipeline(&pipeline);
        list.push_constants_value(ShaderStages::VERTEX, &[1.0f32, 2.0, 3.0, 4.0]);
        list.end();

        match &list.scopes()[0].commands()[1] {
            Command::PushConstants(pc) => {
                assert_eq!(pc.size, 16);
                assert_eq!(pc.pipeline, pipeline.key());
                assert_eq!(pc.bytes(), bytemuck::bytes_of(&[1.0f32, 2.0, 3.0, 4.0]));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn end_forgets_bound_pipeline() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Graphics);

        let mut list = CommandList::new();
        list.begin();
        list.bind_pipeline(&pipeline);
        list.end();

        list.begin();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| list.draw(3, 0)));
        assert!(result.is_err());
    }

    #[test]
    fn clear_image_wraps_itself_in_transitions() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let fb = crate::resource::Framebuffer {
            handle: registry.track("fb", RawResource::Framebuffer(MockObject(9))),
            desc: crate::resource::FramebufferDesc::new("fb", crate::resource::Extent::new(4, 4)),
        };

        let mut list = CommandList::new();
        list.begin();
        list.clear_image(&fb, Vec4::ONE, AttachmentLayout::General, 0, 1);
        list.end();

        let names: Vec<_> = list.scopes()[0].commands().iter().map(Command::name).collect();
        assert_eq!(names, vec!["image_memory_barrier", "clear_image", "image_memory_barrier"]);
    }

    fn framebuffer(registry: &mut ResourceRegistry<MockBackend>) -> crate::resource::Framebuffer {
        crate::resource::Framebuffer {
            handle: registry.track("fb", RawResource::Framebuffer(MockObject(9))),
            desc: crate::resource::FramebufferDesc::new("fb", crate::resource::Extent::new(4, 4)),
        }
    }

    #[test]
    fn copy_image_to_buffer_round_trips_through_transfer_src() {
        let mut fx = Fixture::new();
        let fb = framebuffer(&mut fx.registry);
        let readback = fx.buffer(64);

        let mut list = CommandList::new();
        list.begin();
        list.copy_image_to_buffer(&fb, &readback, AttachmentLayout::ShaderReadOnly);
        list.copy_image_to_buffer(&fb, &readback, AttachmentLayout::TransferSrc);
        list.end();

        let names: Vec<_> = list.scopes()[0].commands().iter().map(Command::name).collect();
        assert_eq!(
            names,
            vec![
                "image_memory_barrier",
                "copy_image_to_buffer",
                "image_memory_barrier",
                "copy_image_to_buffer",
            ]
        );
        match &list.scopes()[0].commands()[0] {
            Command::ImageMemoryBarrier { old, new, .. } => {
                assert_eq!((*old, *new), (AttachmentLayout::ShaderReadOnly, AttachmentLayout::TransferSrc));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn native_payloads_reach_the_backend_handler() {
        use crate::backend::mock::{Event, MockUpload};
        use crate::backend::Backend;

        let upload = MockUpload {
            staging: MockObject(20),
            texture: MockObject(21),
            extent: crate::resource::Extent::new(2, 2),
        };
        let mut list = CommandList::immediate();
        list.begin();
        list.native(upload);
        list.submit_native_command(Arc::new(upload), TypeId::of::<MockUpload>());
        list.end();

        let scope = &list.scopes()[0];
        match &scope.commands()[1] {
            Command::Native(native) => {
                assert_eq!(native.type_tag(), TypeId::of::<MockUpload>());
                assert_eq!(native.payload::<MockUpload>(), Some(&upload));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let mut backend = MockBackend::new(1);
        let registry = ResourceRegistry::new();
        let natives = MockBackend::native_table();
        crate::submit::record_scope(&mut backend, &registry, &natives, MockObject(1), scope);
        assert_eq!(
            backend.events,
            vec![
                Event::Upload { cb: MockObject(1), upload },
                Event::Upload { cb: MockObject(1), upload },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "cannot copy a buffer inside a render pass")]
    fn copy_buffer_in_render_pass_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let a = fx.buffer(16);
        let b = fx.buffer(16);
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.copy_buffer(&a, &b, 16, 0, 0);
    }

    #[test]
    #[should_panic(expected = "cannot dispatch inside a render pass")]
    fn dispatch_in_render_pass_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let pipeline = fx.pipeline(PipelineKind::Compute);
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.bind_pipeline(&pipeline);
        list.dispatch(1, 1, 1);
    }

    #[test]
    #[should_panic(expected = "inside a render pass")]
    fn buffer_barrier_in_render_pass_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let buffer = fx.buffer(16);
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.buffer_memory_barrier(
            &buffer,
            Access::SHADER_WRITE,
            Access::SHADER_READ,
            Stages::COMPUTE_SHADER,
            Stages::COMPUTE_SHADER,
        );
    }

    #[test]
    #[should_panic(expected = "cannot record an image barrier inside a render pass")]
    fn image_barrier_in_render_pass_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let fb = framebuffer(&mut fx.registry);
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.image_memory_barrier(&fb, AttachmentLayout::General, AttachmentLayout::ShaderReadOnly, 0, 1);
    }

    #[test]
    fn resubmitting_a_closed_list_is_allowed() {
        let mut list = CommandList::new();
        list.begin();
        list.end();
        list.mark_submitted();
        list.begin();
        assert!(list.is_recording());
    }

    #[test]
    #[should_panic(expected = "cannot push constants without binding a pipeline")]
    fn push_constants_without_pipeline_is_fatal() {
        let mut list = CommandList::new();
        list.begin();
        list.push_constants(ShaderStages::VERTEX, &[0u8; 16], 0);
    }

    #[test]
    #[should_panic(expected = "without binding a pipeline")]
    fn descriptor_set_without_pipeline_is_fatal() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let set = DescriptorSet {
            handle: registry.track("set", RawResource::DescriptorSet(MockObject(4))),
            desc: crate::resource::DescriptorSetDesc::new("set", Vec::new()),
        };
        let mut list = CommandList::new();
        list.begin();
        list.bind_descriptor_set(0, &set);
    }

    #[test]
    #[should_panic(expected = "without binding a graphics pipeline")]
    fn draw_with_compute_pipeline_is_fatal() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Compute);
        let mut list = CommandList::new();
        list.begin();
        list.bind_pipeline(&pipeline);
        list.draw(3, 0);
    }

    #[test]
    #[should_panic(expected = "without binding a compute pipeline")]
    fn dispatch_with_graphics_pipeline_is_fatal() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline(PipelineKind::Graphics);
        let mut list = CommandList::new();
        list.begin();
        list.bind_pipeline(&pipeline);
        list.dispatch(1, 1, 1);
    }

    #[test]
    #[should_panic(expected = "inside another render pass")]
    fn nested_render_pass_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.begin_render_pass(&pass);
    }

    #[test]
    #[should_panic(expected = "immediate command list")]
    fn render_pass_in_immediate_list_is_fatal() {
        let mut fx = Fixture::new();
        let pass = fx.pass();
        let mut list = CommandList::immediate();
        list.begin();
        list.begin_render_pass(&pass);
    }

    #[test]
    #[should_panic(expected = "already recording")]
    fn double_begin_is_fatal() {
        let mut list = CommandList::new();
        list.begin();
        list.begin();
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn double_end_is_fatal() {
        let mut list = CommandList::new();
        list.begin();
        list.end();
        list.end();
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn recording_before_begin_is_fatal() {
        let mut fx = Fixture::new();
        let buffer = fx.buffer(64);
        let mut list = CommandList::new();
        list.bind_vertex_buffers(&[&buffer]);
    }

    #[test]
    #[should_panic(expected = "unsupported layout transition")]
    fn illegal_barrier_is_rejected_at_record_time() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let fb = crate::resource::Framebuffer {
            handle: registry.track("fb", RawResource::Framebuffer(MockObject(9))),
            desc: crate::resource::FramebufferDesc::new("fb", crate::resource::Extent::new(4, 4)),
        };
        let mut list = CommandList::new();
        list.begin();
        list.image_memory_barrier(&fb, AttachmentLayout::Depth, AttachmentLayout::Present, 0, 1);
    }

    #[test]
    #[should_panic(expected = "copy_buffer range out of bounds")]
    fn copy_at_huge_offset_is_fatal() {
        let mut fx = Fixture::new();
        let a = fx.buffer(16);
        let b = fx.buffer(16);
        let mut list = CommandList::new();
        list.begin();
        list.copy_buffer(&a, &b, 8, u64::MAX - 4, 0);
    }

    #[test]
    #[should_panic(expected = "copy_buffer range out of bounds")]
    fn copy_past_end_is_fatal() {
        let mut fx = Fixture::new();
        let a = fx.buffer(16);
        let b = fx.buffer(8);
        let mut list = CommandList::new();
        list.begin();
        list.copy_buffer(&a, &b, 16, 0, 0);
    }
}
