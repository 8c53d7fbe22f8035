use glam::{Vec2, Vec4};

use super::native::NativeCommand;
use crate::layout::{Access, AttachmentLayout, ImageAspect, Stages};
use crate::registry::ResourceKey;
use crate::resource::{PipelineKind, ShaderStages};

/// Largest push constant block a command can carry inline.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;

/// Inline push constant payload.
#[derive(Debug, Clone)]
pub struct PushConstants {
    pub pipeline: ResourceKey,
    pub kind: PipelineKind,
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
    pub data: [u8; MAX_PUSH_CONSTANT_SIZE],
}

impl PushConstants {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

/// One recorded operation. Resources are referenced by registry key and
/// resolved by the backend at translation time.
#[derive(Debug, Clone)]
pub enum Command {
    BindPipeline {
        pipeline: ResourceKey,
        kind: PipelineKind,
    },
    PushConstants(PushConstants),
    BindDescriptorSet {
        pipeline: ResourceKey,
        kind: PipelineKind,
        set_index: u32,
        set: ResourceKey,
    },
    SetViewport {
        position: Vec2,
        size: Vec2,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissor {
        min: Vec2,
        max: Vec2,
    },
    SetLineWidth(f32),
    BindVertexBuffers(Vec<ResourceKey>),
    /// Indices are always `u32`.
    BindIndexBuffer(ResourceKey),
    ClearImage {
        image: ResourceKey,
        color: Vec4,
        base_mip: u32,
        mip_count: u32,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        vertex_offset: i32,
        first_index: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: ResourceKey,
        dst: ResourceKey,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    },
    /// Copies mip 0 of a color image, which must be in `TransferSrc`.
    CopyImageToBuffer {
        image: ResourceKey,
        buffer: ResourceKey,
    },
    BufferMemoryBarrier {
        buffer: ResourceKey,
        src_access: Access,
        dst_access: Access,
        src_stage: Stages,
        dst_stage: Stages,
    },
    ImageMemoryBarrier {
        image: ResourceKey,
        aspect: ImageAspect,
        old: AttachmentLayout,
        new: AttachmentLayout,
        base_mip: u32,
        mip_count: u32,
    },
    Native(NativeCommand),
}

impl Command {
    /// Short opcode name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::PushConstants(_) => "push_constants",
            Command::BindDescriptorSet { .. } => "bind_descriptor_set",
            Command::SetViewport { .. } => "set_viewport",
            Command::SetScissor { .. } => "set_scissor",
            Command::SetLineWidth(_) => "set_line_width",
            Command::BindVertexBuffers(_) => "bind_vertex_buffers",
            Command::BindIndexBuffer(_) => "bind_index_buffer",
            Command::ClearImage { .. } => "clear_image",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::Dispatch { .. } => "dispatch",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Command::BufferMemoryBarrier { .. } => "buffer_memory_barrier",
            Command::ImageMemoryBarrier { .. } => "image_memory_barrier",
            Command::Native(_) => "native",
        }
    }
}
