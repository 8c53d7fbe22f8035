// Creation parameters for device resources

use bitflags::bitflags;

use crate::layout::AttachmentLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized drawable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    /// Device-local; cannot be created with initial contents.
    Storage,
    /// Host-visible transfer source for uploads.
    Staging,
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(name: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self { name: name.into(), size, usage }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Linear,
    Nearest,
}

/// RGBA8 sampled texture. Glyph atlases come through here as well.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub filter: Filter,
}

impl TextureDesc {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            filter: Filter::Linear,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentFormat {
    #[default]
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub name: String,
    pub extent: Extent,
    pub format: AttachmentFormat,
    pub mip_levels: u32,
    pub depth: bool,
    /// Writable from compute shaders.
    pub storage: bool,
    /// Layout the color image is moved into right after creation.
    pub layout: AttachmentLayout,
}

impl FramebufferDesc {
    pub fn new(name: impl Into<String>, extent: Extent) -> Self {
        Self {
            name: name.into(),
            extent,
            format: AttachmentFormat::default(),
            mip_levels: 1,
            depth: false,
            storage: false,
            layout: AttachmentLayout::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub name: String,
    pub load: LoadOp,
    pub clear_color: [f32; 4],
    pub initial_layout: AttachmentLayout,
    pub final_layout: AttachmentLayout,
}

impl RenderPassDesc {
    /// Clears and leaves the image ready for presentation.
    pub fn swapchain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load: LoadOp::Clear,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            initial_layout: AttachmentLayout::Undefined,
            final_layout: AttachmentLayout::Present,
        }
    }

    /// Clears and leaves the image readable from fragment shaders.
    pub fn offscreen(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load: LoadOp::Clear,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            initial_layout: AttachmentLayout::Undefined,
            final_layout: AttachmentLayout::ShaderReadOnly,
        }
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 0x01;
        const FRAGMENT = 0x10;
        const COMPUTE = 0x20;
    }
}

/// Compiled SPIR-V per stage, produced by the shader pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShaderResult {
    stages: Vec<(ShaderStages, Vec<u8>)>,
}

impl ShaderResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: ShaderStages, bytecode: Vec<u8>) -> Self {
        self.stages.retain(|(s, _)| *s != stage);
        self.stages.push((stage, bytecode));
        self
    }

    pub fn stage(&self, stage: ShaderStages) -> Option<&[u8]> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, code)| code.as_slice())
    }

    pub fn stages(&self) -> impl Iterator<Item = (ShaderStages, &[u8])> {
        self.stages.iter().map(|(s, code)| (*s, code.as_slice()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Uint,
    Rgba8Unorm,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

#[derive(Debug, Clone, Copy)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub name: String,
    pub shader: ShaderResult,
    pub vertex_layout: Option<VertexLayout>,
    pub topology: Topology,
    pub cull: CullMode,
    pub depth_test: bool,
    pub blend: bool,
    pub push_constants: Option<PushConstantRange>,
    /// Set layouts in set-index order.
    pub descriptor_sets: Vec<DescriptorSetDesc>,
}

impl GraphicsPipelineDesc {
    pub fn new(name: impl Into<String>, shader: ShaderResult) -> Self {
        Self {
            name: name.into(),
            shader,
            vertex_layout: None,
            topology: Topology::default(),
            cull: CullMode::default(),
            depth_test: false,
            blend: false,
            push_constants: None,
            descriptor_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub shader: ShaderResult,
    pub push_constants: Option<PushConstantRange>,
    pub descriptor_sets: Vec<DescriptorSetDesc>,
}

impl ComputePipelineDesc {
    pub fn new(name: impl Into<String>, shader: ShaderResult) -> Self {
        Self {
            name: name.into(),
            shader,
            push_constants: None,
            descriptor_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: BindingKind,
    pub stages: ShaderStages,
}

#[derive(Debug, Clone)]
pub struct DescriptorSetDesc {
    pub name: String,
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetDesc {
    pub fn new(name: impl Into<String>, bindings: Vec<DescriptorBinding>) -> Self {
        Self { name: name.into(), bindings }
    }

    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}
