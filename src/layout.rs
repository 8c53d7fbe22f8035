// Attachment layout state machine
//
// Images are only valid for a given operation in a given layout. Every legal
// (old, new) pair maps to a fixed stage/access pairing; anything else is a
// bug in the caller and ends the process through `error::fatal`.
//
// Stage and access bits share their values with the Vulkan flags so the
// backend converts with a raw cast.

use bitflags::bitflags;

use crate::error::fatal;

/// How an image is currently laid out for hardware access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentLayout {
    Undefined,
    General,
    ShaderReadOnly,
    Color,
    Depth,
    TransferSrc,
    TransferDst,
    Present,
}

impl AttachmentLayout {
    pub const ALL: [AttachmentLayout; 8] = [
        AttachmentLayout::Undefined,
        AttachmentLayout::General,
        AttachmentLayout::ShaderReadOnly,
        AttachmentLayout::Color,
        AttachmentLayout::Depth,
        AttachmentLayout::TransferSrc,
        AttachmentLayout::TransferDst,
        AttachmentLayout::Present,
    ];
}

/// Which part of an attachment a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
}

bitflags! {
    /// Memory access kinds a barrier waits for or makes visible.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const INPUT_ATTACHMENT_READ = 1 << 4;
        const SHADER_READ = 1 << 5;
        const SHADER_WRITE = 1 << 6;
        const COLOR_ATTACHMENT_READ = 1 << 7;
        const COLOR_ATTACHMENT_WRITE = 1 << 8;
        const DEPTH_STENCIL_READ = 1 << 9;
        const DEPTH_STENCIL_WRITE = 1 << 10;
        const TRANSFER_READ = 1 << 11;
        const TRANSFER_WRITE = 1 << 12;
        const HOST_READ = 1 << 13;
        const HOST_WRITE = 1 << 14;
        const MEMORY_READ = 1 << 15;
        const MEMORY_WRITE = 1 << 16;
    }
}

bitflags! {
    /// Pipeline stages a barrier waits on or blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Stages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 7;
        const EARLY_FRAGMENT_TESTS = 1 << 8;
        const LATE_FRAGMENT_TESTS = 1 << 9;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 10;
        const COMPUTE_SHADER = 1 << 11;
        const TRANSFER = 1 << 12;
        const BOTTOM_OF_PIPE = 1 << 13;
    }
}

/// Stage/access pairing for one legal layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub src_access: Access,
    pub dst_access: Access,
    pub src_stage: Stages,
    pub dst_stage: Stages,
}

impl Transition {
    fn new(src_access: Access, dst_access: Access, src_stage: Stages, dst_stage: Stages) -> Self {
        Self { src_access, dst_access, src_stage, dst_stage }
    }
}

/// Look up the barrier for `old -> new`. `None` means the pair is illegal.
pub fn transition(old: AttachmentLayout, new: AttachmentLayout) -> Option<Transition> {
    use AttachmentLayout as L;

    let shader_rw = Access::SHADER_READ | Access::SHADER_WRITE;
    let compute_fragment = Stages::COMPUTE_SHADER | Stages::FRAGMENT_SHADER;

    let t = match (old, new) {
        (L::Undefined, L::TransferDst) => Transition::new(
            Access::empty(),
            Access::TRANSFER_WRITE,
            Stages::TOP_OF_PIPE,
            Stages::TRANSFER,
        ),
        (L::TransferDst, L::ShaderReadOnly) => Transition::new(
            Access::TRANSFER_WRITE,
            Access::SHADER_READ,
            Stages::TRANSFER,
            Stages::FRAGMENT_SHADER,
        ),
        (L::Undefined, L::Depth) => Transition::new(
            Access::empty(),
            Access::DEPTH_STENCIL_READ | Access::DEPTH_STENCIL_WRITE,
            Stages::TOP_OF_PIPE,
            Stages::EARLY_FRAGMENT_TESTS,
        ),
        (L::Color, L::ShaderReadOnly) => Transition::new(
            Access::COLOR_ATTACHMENT_WRITE,
            Access::SHADER_READ,
            Stages::COLOR_ATTACHMENT_OUTPUT,
            Stages::FRAGMENT_SHADER,
        ),
        (L::ShaderReadOnly, L::Color) => Transition::new(
            Access::SHADER_READ,
            Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE,
            Stages::FRAGMENT_SHADER,
            Stages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::Color, L::General) => Transition::new(
            Access::COLOR_ATTACHMENT_WRITE,
            shader_rw,
            Stages::COLOR_ATTACHMENT_OUTPUT,
            compute_fragment,
        ),
        (L::General, L::Color) => Transition::new(
            shader_rw,
            Access::COLOR_ATTACHMENT_WRITE,
            compute_fragment,
            Stages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::General, L::ShaderReadOnly) => Transition::new(
            shader_rw,
            Access::SHADER_READ,
            compute_fragment,
            Stages::FRAGMENT_SHADER,
        ),
        (L::ShaderReadOnly, L::General) => Transition::new(
            Access::SHADER_READ,
            shader_rw,
            Stages::FRAGMENT_SHADER,
            compute_fragment,
        ),
        (L::Undefined, L::General) => Transition::new(
            Access::empty(),
            shader_rw,
            Stages::TOP_OF_PIPE,
            compute_fragment,
        ),
        (L::General, L::General) => Transition::new(
            shader_rw,
            shader_rw,
            Stages::COMPUTE_SHADER,
            Stages::COMPUTE_SHADER,
        ),
        (L::General, L::TransferDst) => Transition::new(
            shader_rw,
            Access::TRANSFER_WRITE,
            compute_fragment,
            Stages::TRANSFER,
        ),
        (L::TransferDst, L::General) => Transition::new(
            Access::TRANSFER_WRITE,
            shader_rw,
            Stages::TRANSFER,
            compute_fragment,
        ),

        // Attachment creation
        (L::Undefined, L::Color) => Transition::new(
            Access::empty(),
            Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE,
            Stages::TOP_OF_PIPE,
            Stages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::Undefined, L::ShaderReadOnly) => Transition::new(
            Access::empty(),
            Access::SHADER_READ,
            Stages::TOP_OF_PIPE,
            Stages::FRAGMENT_SHADER,
        ),

        // Clears
        (L::Color, L::TransferDst) => Transition::new(
            Access::COLOR_ATTACHMENT_WRITE,
            Access::TRANSFER_WRITE,
            Stages::COLOR_ATTACHMENT_OUTPUT,
            Stages::TRANSFER,
        ),
        (L::TransferDst, L::Color) => Transition::new(
            Access::TRANSFER_WRITE,
            Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE,
            Stages::TRANSFER,
            Stages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::ShaderReadOnly, L::TransferDst) => Transition::new(
            Access::SHADER_READ,
            Access::TRANSFER_WRITE,
            Stages::FRAGMENT_SHADER,
            Stages::TRANSFER,
        ),

        // Copies out of an attachment
        (L::Color, L::TransferSrc) => Transition::new(
            Access::COLOR_ATTACHMENT_WRITE,
            Access::TRANSFER_READ,
            Stages::COLOR_ATTACHMENT_OUTPUT,
            Stages::TRANSFER,
        ),
        (L::TransferSrc, L::Color) => Transition::new(
            Access::TRANSFER_READ,
            Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE,
            Stages::TRANSFER,
            Stages::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::ShaderReadOnly, L::TransferSrc) => Transition::new(
            Access::SHADER_READ,
            Access::TRANSFER_READ,
            Stages::FRAGMENT_SHADER,
            Stages::TRANSFER,
        ),
        (L::TransferSrc, L::ShaderReadOnly) => Transition::new(
            Access::TRANSFER_READ,
            Access::SHADER_READ,
            Stages::TRANSFER,
            Stages::FRAGMENT_SHADER,
        ),
        (L::General, L::TransferSrc) => Transition::new(
            shader_rw,
            Access::TRANSFER_READ,
            compute_fragment,
            Stages::TRANSFER,
        ),
        (L::TransferSrc, L::General) => Transition::new(
            Access::TRANSFER_READ,
            shader_rw,
            Stages::TRANSFER,
            compute_fragment,
        ),

        // Presentation
        (L::Color, L::Present) => Transition::new(
            Access::COLOR_ATTACHMENT_WRITE,
            Access::empty(),
            Stages::COLOR_ATTACHMENT_OUTPUT,
            Stages::BOTTOM_OF_PIPE,
        ),
        (L::TransferDst, L::Present) => Transition::new(
            Access::TRANSFER_WRITE,
            Access::empty(),
            Stages::TRANSFER,
            Stages::BOTTOM_OF_PIPE,
        ),

        _ => return None,
    };

    Some(t)
}

/// Like [`transition`], but an illegal pair is fatal.
#[track_caller]
pub fn require(old: AttachmentLayout, new: AttachmentLayout) -> Transition {
    match transition(old, new) {
        Some(t) => t,
        None => fatal(format_args!("unsupported layout transition {:?} -> {:?}", old, new)),
    }
}

/// Every pair the crate itself records: attachment creation, clears,
/// texture uploads, copies out of attachments, and presentation.
pub const LIFECYCLE_TRANSITIONS: &[(AttachmentLayout, AttachmentLayout)] = &[
    (AttachmentLayout::Undefined, AttachmentLayout::TransferDst),
    (AttachmentLayout::TransferDst, AttachmentLayout::ShaderReadOnly),
    (AttachmentLayout::Undefined, AttachmentLayout::Depth),
    (AttachmentLayout::Undefined, AttachmentLayout::Color),
    (AttachmentLayout::Undefined, AttachmentLayout::General),
    (AttachmentLayout::Undefined, AttachmentLayout::ShaderReadOnly),
    (AttachmentLayout::Color, AttachmentLayout::TransferDst),
    (AttachmentLayout::TransferDst, AttachmentLayout::Color),
    (AttachmentLayout::General, AttachmentLayout::TransferDst),
    (AttachmentLayout::TransferDst, AttachmentLayout::General),
    (AttachmentLayout::ShaderReadOnly, AttachmentLayout::TransferDst),
    (AttachmentLayout::Color, AttachmentLayout::TransferSrc),
    (AttachmentLayout::TransferSrc, AttachmentLayout::Color),
    (AttachmentLayout::ShaderReadOnly, AttachmentLayout::TransferSrc),
    (AttachmentLayout::TransferSrc, AttachmentLayout::ShaderReadOnly),
    (AttachmentLayout::General, AttachmentLayout::TransferSrc),
    (AttachmentLayout::TransferSrc, AttachmentLayout::General),
    (AttachmentLayout::Color, AttachmentLayout::Present),
    (AttachmentLayout::TransferDst, AttachmentLayout::Present),
];

/// Startup check that every lifecycle pair has a table entry.
pub fn verify_lifecycle() {
    for &(old, new) in LIFECYCLE_TRANSITIONS {
        require(old, new);
    }
}
