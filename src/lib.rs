//! frameline: a frame-pipelined renderer core.
//!
//! Application code records [`CommandList`]s and creates resources through a
//! [`Device`]; the device runs several frames ahead of the GPU and defers
//! every resource release until the frame slot that last used it has
//! completed.

pub mod error;

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod frame;
pub mod free_queue;
pub mod layout;
pub mod registry;
pub mod resource;
pub mod submit;

pub use backend::{Backend, VulkanBackend};
pub use command::{CommandList, CommandScope, ListState, ScopeKind};
pub use config::Config;
pub use device::Device;
pub use frame::{FrameSlot, FrameStatus};
pub use layout::AttachmentLayout;
