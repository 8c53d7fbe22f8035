// Ownership registry
//
// Every live backend object is stored here, keyed by a slotmap key. The
// application-facing wrappers only hold a `ResourceHandle` (key + drop inbox).
// Dropping a wrapper posts its key to the inbox; the device later removes the
// object from the registry and moves it into the destruction queue of the
// current frame slot. An object is therefore in exactly one place at a time:
// the registry, a destruction queue, or already destroyed.
//
// At shutdown the registry is force-released: whatever is still registered is
// handed back for destruction and the inbox is closed, so late wrapper drops
// become no-ops.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::backend::Backend;
use crate::error::fatal;

new_key_type! {
    /// Stable identifier of a registered device object.
    pub struct ResourceKey;
}

/// Resource categories, used for dispatch at destruction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Framebuffer,
    RenderPass,
    Pipeline,
    DescriptorSet,
    Swapchain,
}

/// A backend object tagged with its kind.
///
/// This is the unit that travels from the registry into the destruction
/// queue; `Backend::destroy` matches on it when the queue drains.
pub enum RawResource<B: Backend> {
    Buffer(B::Buffer),
    Texture(B::Texture),
    Framebuffer(B::Framebuffer),
    RenderPass(B::RenderPass),
    Pipeline(B::Pipeline),
    DescriptorSet(B::DescriptorSet),
    Swapchain(B::Swapchain),
}

impl<B: Backend> RawResource<B> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RawResource::Buffer(_) => ResourceKind::Buffer,
            RawResource::Texture(_) => ResourceKind::Texture,
            RawResource::Framebuffer(_) => ResourceKind::Framebuffer,
            RawResource::RenderPass(_) => ResourceKind::RenderPass,
            RawResource::Pipeline(_) => ResourceKind::Pipeline,
            RawResource::DescriptorSet(_) => ResourceKind::DescriptorSet,
            RawResource::Swapchain(_) => ResourceKind::Swapchain,
        }
    }
}

impl<B: Backend> fmt::Debug for RawResource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawResource::{:?}", self.kind())
    }
}

/// Borrowed view of anything that owns a color/depth image.
pub enum ImageRef<'a, B: Backend> {
    Texture(&'a B::Texture),
    Framebuffer(&'a B::Framebuffer),
}

#[derive(Default)]
struct InboxState {
    keys: Vec<ResourceKey>,
    closed: bool,
}

/// Keys of wrappers dropped since the last collection.
#[derive(Clone, Default)]
pub(crate) struct DropInbox {
    state: Arc<Mutex<InboxState>>,
}

impl DropInbox {
    fn post(&self, key: ResourceKey) {
        let mut state = self.state.lock();
        if !state.closed {
            state.keys.push(key);
        }
    }

    fn take(&self) -> Vec<ResourceKey> {
        std::mem::take(&mut self.state.lock().keys)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.keys.clear();
    }
}

/// Owning half of a registered resource. Dropping it schedules the object
/// for deferred destruction.
pub struct ResourceHandle {
    key: ResourceKey,
    inbox: DropInbox,
}

impl ResourceHandle {
    pub fn key(&self) -> ResourceKey {
        self.key
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.key).finish()
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.inbox.post(self.key);
    }
}

struct Tracked<B: Backend> {
    name: String,
    raw: RawResource<B>,
}

/// Non-owning tracker of every live device object.
pub struct ResourceRegistry<B: Backend> {
    live: SlotMap<ResourceKey, Tracked<B>>,
    inbox: DropInbox,
}

impl<B: Backend> Default for ResourceRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ResourceRegistry<B> {
    pub fn new() -> Self {
        Self {
            live: SlotMap::with_key(),
            inbox: DropInbox::default(),
        }
    }

    /// Register `raw` and return the handle that owns it.
    pub fn track(&mut self, name: impl Into<String>, raw: RawResource<B>) -> ResourceHandle {
        let name = name.into();
        log::trace!("Tracking {:?} '{}'", raw.kind(), name);
        let key = self.live.insert(Tracked { name, raw });
        ResourceHandle {
            key,
            inbox: self.inbox.clone(),
        }
    }

    /// Swap the object behind `key` for a new one, returning the old object.
    pub fn replace(&mut self, key: ResourceKey, raw: RawResource<B>) -> RawResource<B> {
        match self.live.get_mut(key) {
            Some(tracked) => {
                if tracked.raw.kind() != raw.kind() {
                    fatal(format_args!(
                        "cannot replace {:?} '{}' with a {:?}",
                        tracked.raw.kind(),
                        tracked.name,
                        raw.kind()
                    ));
                }
                std::mem::replace(&mut tracked.raw, raw)
            }
            None => fatal(format_args!("cannot replace unregistered resource {:?}", key)),
        }
    }

    /// Remove every resource whose wrapper was dropped since the last call.
    /// Keys that are no longer registered are ignored.
    pub fn collect_dropped(&mut self) -> Vec<(ResourceKey, RawResource<B>)> {
        self.inbox
            .take()
            .into_iter()
            .filter_map(|key| {
                let tracked = self.live.remove(key)?;
                log::trace!("Releasing {:?} '{}'", tracked.raw.kind(), tracked.name);
                Some((key, tracked.raw))
            })
            .collect()
    }

    /// Hand back everything still registered and stop accepting drops.
    pub fn release_all(&mut self) -> Vec<(String, RawResource<B>)> {
        self.inbox.close();
        self.live
            .drain()
            .map(|(_, tracked)| (tracked.name, tracked.raw))
            .collect()
    }

    pub fn contains(&self, key: ResourceKey) -> bool {
        self.live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn name(&self, key: ResourceKey) -> Option<&str> {
        self.live.get(key).map(|t| t.name.as_str())
    }

    pub fn kind(&self, key: ResourceKey) -> Option<ResourceKind> {
        self.live.get(key).map(|t| t.raw.kind())
    }

    #[track_caller]
    fn lookup(&self, key: ResourceKey) -> &Tracked<B> {
        match self.live.get(key) {
            Some(tracked) => tracked,
            None => fatal(format_args!("command references destroyed resource {:?}", key)),
        }
    }

    #[track_caller]
    pub fn buffer(&self, key: ResourceKey) -> &B::Buffer {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::Buffer(buffer) => buffer,
            other => mismatch(&tracked.name, ResourceKind::Buffer, other.kind()),
        }
    }

    #[track_caller]
    pub fn buffer_mut(&mut self, key: ResourceKey) -> &mut B::Buffer {
        match self.live.get_mut(key) {
            Some(Tracked { raw: RawResource::Buffer(buffer), .. }) => buffer,
            Some(tracked) => mismatch(&tracked.name, ResourceKind::Buffer, tracked.raw.kind()),
            None => fatal(format_args!("write to destroyed buffer {:?}", key)),
        }
    }

    #[track_caller]
    pub fn texture(&self, key: ResourceKey) -> &B::Texture {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::Texture(texture) => texture,
            other => mismatch(&tracked.name, ResourceKind::Texture, other.kind()),
        }
    }

    #[track_caller]
    pub fn framebuffer(&self, key: ResourceKey) -> &B::Framebuffer {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::Framebuffer(framebuffer) => framebuffer,
            other => mismatch(&tracked.name, ResourceKind::Framebuffer, other.kind()),
        }
    }

    #[track_caller]
    pub fn render_pass(&self, key: ResourceKey) -> &B::RenderPass {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::RenderPass(pass) => pass,
            other => mismatch(&tracked.name, ResourceKind::RenderPass, other.kind()),
        }
    }

    #[track_caller]
    pub fn pipeline(&self, key: ResourceKey) -> &B::Pipeline {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::Pipeline(pipeline) => pipeline,
            other => mismatch(&tracked.name, ResourceKind::Pipeline, other.kind()),
        }
    }

    #[track_caller]
    pub fn descriptor_set(&self, key: ResourceKey) -> &B::DescriptorSet {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::DescriptorSet(set) => set,
            other => mismatch(&tracked.name, ResourceKind::DescriptorSet, other.kind()),
        }
    }

    /// Textures and framebuffers both own images that barriers and clears
    /// can target.
    #[track_caller]
    pub fn image(&self, key: ResourceKey) -> ImageRef<'_, B> {
        let tracked = self.lookup(key);
        match &tracked.raw {
            RawResource::Texture(texture) => ImageRef::Texture(texture),
            RawResource::Framebuffer(framebuffer) => ImageRef::Framebuffer(framebuffer),
            other => mismatch(&tracked.name, ResourceKind::Framebuffer, other.kind()),
        }
    }
}

#[cold]
#[track_caller]
fn mismatch(name: &str, expected: ResourceKind, found: ResourceKind) -> ! {
    fatal(format_args!(
        "resource '{}' is a {:?}, expected a {:?}",
        name, found, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockObject};

    fn buffer(id: u32) -> RawResource<MockBackend> {
        RawResource::Buffer(MockObject(id))
    }

    #[test]
    fn dropped_handles_are_collected_once() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let a = registry.track("a", buffer(1));
        let b = registry.track("b", buffer(2));
        assert_eq!(registry.len(), 2);

        let key_a = a.key();
        drop(a);
        let collected = registry.collect_dropped();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].0, key_a);
        assert!(!registry.contains(key_a));

        // Nothing new was dropped
        assert!(registry.collect_dropped().is_empty());
        assert_eq!(registry.len(), 1);
        drop(b);
    }

    #[test]
    fn release_all_closes_the_inbox() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let a = registry.track("a", buffer(1));
        let _b = registry.track("b", buffer(2));

        let leaked = registry.release_all();
        assert_eq!(leaked.len(), 2);
        assert!(registry.is_empty());

        // Late drops after teardown must not resurface
        drop(a);
        assert!(registry.collect_dropped().is_empty());
    }

    #[test]
    fn replace_returns_previous_object() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let handle = registry.track("fb", RawResource::Framebuffer(MockObject(7)));
        let old = registry.replace(handle.key(), RawResource::Framebuffer(MockObject(8)));
        assert!(matches!(old, RawResource::Framebuffer(MockObject(7))));
        assert_eq!(registry.framebuffer(handle.key()), &MockObject(8));
    }

    #[test]
    #[should_panic(expected = "expected a Pipeline")]
    fn typed_lookup_rejects_wrong_kind() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let handle = registry.track("vb", buffer(3));
        registry.pipeline(handle.key());
    }

    #[test]
    #[should_panic(expected = "destroyed resource")]
    fn lookup_of_collected_key_is_fatal() {
        let mut registry = ResourceRegistry::<MockBackend>::new();
        let handle = registry.track("vb", buffer(3));
        let key = handle.key();
        drop(handle);
        registry.collect_dropped();
        registry.buffer(key);
    }
}
