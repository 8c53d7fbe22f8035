// Application-facing resource wrappers
//
// Wrappers own a `ResourceHandle`; the backend object itself lives in the
// device's registry. Dropping a wrapper schedules deferred destruction.
// Wrappers are not `Clone`; share them with `Arc` when several owners need one.

mod desc;

pub use desc::*;

use crate::registry::{ResourceHandle, ResourceKey};

/// Anything an image barrier, clear, or copy can target.
pub trait ImageResource {
    fn image_key(&self) -> ResourceKey;
    fn mip_levels(&self) -> u32 {
        1
    }
}

#[derive(Debug)]
pub struct Buffer {
    pub(crate) handle: ResourceHandle,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
}

impl Buffer {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

#[derive(Debug)]
pub struct Texture {
    pub(crate) handle: ResourceHandle,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl Texture {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

impl ImageResource for Texture {
    fn image_key(&self) -> ResourceKey {
        self.key()
    }
}

/// Offscreen color attachment, optionally with depth.
#[derive(Debug)]
pub struct Framebuffer {
    pub(crate) handle: ResourceHandle,
    pub(crate) desc: FramebufferDesc,
}

impl Framebuffer {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn desc(&self) -> &FramebufferDesc {
        &self.desc
    }

    pub fn extent(&self) -> Extent {
        self.desc.extent
    }
}

impl ImageResource for Framebuffer {
    fn image_key(&self) -> ResourceKey {
        self.key()
    }

    fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

/// What a render pass draws into.
#[derive(Debug, Clone, Copy)]
pub enum RenderTarget<'a> {
    Swapchain,
    Framebuffer(&'a Framebuffer),
}

#[derive(Debug)]
pub struct RenderPass {
    pub(crate) handle: ResourceHandle,
    pub(crate) targets_swapchain: bool,
    pub(crate) clears: bool,
}

impl RenderPass {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn targets_swapchain(&self) -> bool {
        self.targets_swapchain
    }

    /// Whether beginning the pass clears its color attachment.
    pub fn clears(&self) -> bool {
        self.clears
    }
}

#[derive(Debug)]
pub struct Pipeline {
    pub(crate) handle: ResourceHandle,
    pub(crate) kind: PipelineKind,
}

impl Pipeline {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct DescriptorSet {
    pub(crate) handle: ResourceHandle,
    pub(crate) desc: DescriptorSetDesc,
}

impl DescriptorSet {
    pub fn key(&self) -> ResourceKey {
        self.handle.key()
    }

    pub fn desc(&self) -> &DescriptorSetDesc {
        &self.desc
    }
}

/// A resource to write into a descriptor binding.
#[derive(Debug, Clone, Copy)]
pub enum ResourceBinding<'a> {
    UniformBuffer(&'a Buffer),
    StorageBuffer(&'a Buffer),
    Texture(&'a Texture),
    Attachment(&'a Framebuffer),
    StorageAttachment(&'a Framebuffer),
}
