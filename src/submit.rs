// Submission engine
//
// Translates closed command lists into backend command buffers. Each scope of
// a list becomes one secondary buffer taken from the current slot's pool; at
// the end of the frame the secondaries are stitched into a single primary,
// with render pass begin/end around the ones recorded for a pass.
//
// A slot's pool is only rewound after its fence has signaled, so a secondary
// the device may still be executing is never re-recorded.

use anyhow::{Context, Result};

use crate::backend::Backend;
use crate::command::{CommandList, CommandScope, NativeTable, ScopeKind, Command};
use crate::frame::FrameSlot;
use crate::registry::{ResourceKey, ResourceRegistry};

/// One translated scope waiting for primary assembly.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedScope<C> {
    pub buffer: C,
    pub kind: ScopeKind,
    pub render_pass: Option<ResourceKey>,
}

struct SecondaryPool<C> {
    buffers: Vec<C>,
    used: usize,
}

pub struct SubmissionEngine<B: Backend> {
    pools: Vec<SecondaryPool<B::CommandBuffer>>,
    submitted: Vec<SubmittedScope<B::CommandBuffer>>,
    natives: NativeTable<B>,
    grow_by: usize,
}

impl<B: Backend> SubmissionEngine<B> {
    pub fn new(backend: &mut B, frames_in_flight: usize, pool_size: usize) -> Result<Self> {
        let grow_by = pool_size.max(1);
        let mut pools = Vec::with_capacity(frames_in_flight);
        for index in 0..frames_in_flight {
            let buffers = backend
                .allocate_secondary(FrameSlot::new(index), grow_by)
                .context("Failed to allocate secondary command buffers")?;
            pools.push(SecondaryPool { buffers, used: 0 });
        }

        log::debug!(
            "Submission engine ready: {} slots x {} secondary buffers",
            frames_in_flight,
            grow_by
        );

        Ok(Self {
            pools,
            submitted: Vec::new(),
            natives: B::native_table(),
            grow_by,
        })
    }

    /// Translate every scope of `list` that has work for `slot`.
    pub fn translate(
        &mut self,
        backend: &mut B,
        registry: &ResourceRegistry<B>,
        slot: FrameSlot,
        image_index: u32,
        list: &CommandList,
    ) -> Result<()> {
        for scope in list.scopes().iter().filter(|s| s.has_work()) {
            let buffer = self.take_buffer(backend, slot)?;

            let pass = scope.render_pass().map(|key| registry.render_pass(key));
            backend.begin_secondary(buffer, pass, image_index)?;
            record_scope(backend, registry, &self.natives, buffer, scope);
            backend.end_commands(buffer)?;

            self.submitted.push(SubmittedScope {
                buffer,
                kind: scope.kind(),
                render_pass: scope.render_pass(),
            });
        }
        Ok(())
    }

    /// Build the frame's primary buffer from everything submitted so far.
    pub fn assemble(
        &mut self,
        backend: &mut B,
        registry: &ResourceRegistry<B>,
        slot: FrameSlot,
        image_index: u32,
    ) -> Result<B::CommandBuffer> {
        let primary = backend.begin_primary(slot)?;

        for scope in &self.submitted {
            match scope.render_pass {
                Some(key) => {
                    backend.begin_render_pass(primary, registry.render_pass(key), image_index);
                    backend.execute_secondary(primary, scope.buffer);
                    backend.end_render_pass(primary);
                }
                None => backend.execute_secondary(primary, scope.buffer),
            }
        }

        log::trace!(
            "Assembled primary for slot {} from {} secondaries",
            slot.index(),
            self.submitted.len()
        );
        Ok(primary)
    }

    /// Forget the frame's submissions and rewind `slot`'s pool.
    pub fn reset(&mut self, slot: FrameSlot) {
        self.submitted.clear();
        self.pools[slot.index()].used = 0;
    }

    /// Record `list` into a one-shot primary and block until it has run.
    pub fn submit_immediate(
        &self,
        backend: &mut B,
        registry: &ResourceRegistry<B>,
        list: &CommandList,
    ) -> Result<()> {
        let cb = backend.begin_immediate()?;
        for scope in list.scopes() {
            record_scope(backend, registry, &self.natives, cb, scope);
        }
        backend.submit_immediate(cb).context("Immediate submission failed")
    }

    pub fn submitted(&self) -> &[SubmittedScope<B::CommandBuffer>] {
        &self.submitted
    }

    pub fn pool_capacity(&self, slot: FrameSlot) -> usize {
        self.pools[slot.index()].buffers.len()
    }

    pub fn pool_used(&self, slot: FrameSlot) -> usize {
        self.pools[slot.index()].used
    }

    fn take_buffer(&mut self, backend: &mut B, slot: FrameSlot) -> Result<B::CommandBuffer> {
        let pool = &mut self.pools[slot.index()];
        if pool.used == pool.buffers.len() {
            let more = backend
                .allocate_secondary(slot, self.grow_by)
                .context("Failed to grow secondary command pool")?;
            pool.buffers.extend(more);
            log::debug!(
                "Secondary pool for slot {} grown to {}",
                slot.index(),
                pool.buffers.len()
            );
        }

        let buffer = pool.buffers[pool.used];
        pool.used += 1;
        Ok(buffer)
    }
}

/// Translate every entry of `scope` into `cb`, in order.
pub fn record_scope<B: Backend>(
    backend: &mut B,
    registry: &ResourceRegistry<B>,
    natives: &NativeTable<B>,
    cb: B::CommandBuffer,
    scope: &CommandScope,
) {
    for command in scope.commands() {
        log::trace!("{:?} <- {}", cb, command.name());
        match command {
            Command::Native(native) => natives.dispatch(backend, cb, native),
            other => backend.record(cb, other, registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Event, MockBackend, MockObject};
    use crate::registry::RawResource;
    use crate::resource::{Pipeline, PipelineKind, RenderPass};

    fn engine(backend: &mut MockBackend, pool: usize) -> SubmissionEngine<MockBackend> {
        SubmissionEngine::new(backend, 2, pool).unwrap()
    }

    fn compute_list(registry: &mut ResourceRegistry<MockBackend>, scopes: usize) -> (CommandList, Pipeline) {
        let pipeline = Pipeline {
            handle: registry.track("cs", RawResource::Pipeline(MockObject(5))),
            kind: PipelineKind::Compute,
        };
        let pass = RenderPass {
            handle: registry.track("pass", RawResource::RenderPass(MockObject(6))),
            targets_swapchain: true,
            clears: false,
        };

        let mut list = CommandList::new();
        list.begin();
        for _ in 0..scopes {
            list.bind_pipeline(&pipeline);
            list.dispatch(1, 1, 1);
            list.begin_render_pass(&pass);
            list.end_render_pass();
        }
        list.end();
        drop(pass);
        (list, pipeline)
    }

    #[test]
    fn pools_are_preallocated_per_slot() {
        let mut backend = MockBackend::new(2);
        let engine = engine(&mut backend, 4);
        assert_eq!(engine.pool_capacity(FrameSlot::new(0)), 4);
        assert_eq!(engine.pool_capacity(FrameSlot::new(1)), 4);
        assert_eq!(
            backend.count(|e| matches!(e, Event::AllocateSecondary { .. })),
            2
        );
    }

    #[test]
    fn empty_scopes_are_skipped() {
        let mut backend = MockBackend::new(2);
        let mut registry = ResourceRegistry::new();
        let mut engine = engine(&mut backend, 4);
        let (list, _pipeline) = compute_list(&mut registry, 1);

        // general(bind, dispatch), pass(empty), general(empty)
        engine
            .translate(&mut backend, &registry, FrameSlot::new(0), 0, &list)
            .unwrap();
        assert_eq!(engine.submitted().len(), 1);
        assert_eq!(engine.submitted()[0].kind, ScopeKind::General);
        assert_eq!(engine.pool_used(FrameSlot::new(0)), 1);
    }

    #[test]
    fn empty_clearing_pass_is_still_begun() {
        let mut backend = MockBackend::new(2);
        let mut registry = ResourceRegistry::new();
        let mut engine = engine(&mut backend, 4);
        let pass = RenderPass {
            handle: registry.track("clear", RawResource::RenderPass(MockObject(9))),
            targets_swapchain: true,
            clears: true,
        };

        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.end_render_pass();
        list.end();

        engine
            .translate(&mut backend, &registry, FrameSlot::new(0), 0, &list)
            .unwrap();
        assert_eq!(engine.submitted().len(), 1);
        assert_eq!(engine.submitted()[0].render_pass, Some(pass.key()));

        engine
            .assemble(&mut backend, &registry, FrameSlot::new(0), 0)
            .unwrap();
        assert!(backend.events.contains(&Event::BeginRenderPass(MockObject(9))));
        assert!(backend.events.contains(&Event::EndRenderPass));
    }

    #[test]
    fn pool_grows_when_exhausted() {
        let mut backend = MockBackend::new(2);
        let mut registry = ResourceRegistry::new();
        let mut engine = engine(&mut backend, 2);
        let (list, _pipeline) = compute_list(&mut registry, 5);

        engine
            .translate(&mut backend, &registry, FrameSlot::new(1), 0, &list)
            .unwrap();
        assert_eq!(engine.pool_used(FrameSlot::new(1)), 5);
        assert_eq!(engine.pool_capacity(FrameSlot::new(1)), 6);
        assert_eq!(engine.pool_capacity(FrameSlot::new(0)), 2);

        engine.reset(FrameSlot::new(1));
        assert_eq!(engine.pool_used(FrameSlot::new(1)), 0);
        assert_eq!(engine.pool_capacity(FrameSlot::new(1)), 6);
        assert!(engine.submitted().is_empty());
    }

    #[test]
    fn assemble_wraps_pass_scopes() {
        let mut backend = MockBackend::new(2);
        let mut registry = ResourceRegistry::new();
        let mut engine = engine(&mut backend, 4);
        let pipeline = Pipeline {
            handle: registry.track("gfx", RawResource::Pipeline(MockObject(7))),
            kind: PipelineKind::Graphics,
        };
        let pass = RenderPass {
            handle: registry.track("pass", RawResource::RenderPass(MockObject(8))),
            targets_swapchain: true,
            clears: true,
        };

        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.bind_pipeline(&pipeline);
        list.draw(3, 0);
        list.end_render_pass();
        list.end();

        engine
            .translate(&mut backend, &registry, FrameSlot::new(0), 1, &list)
            .unwrap();
        let secondary = engine.submitted()[0].buffer;
        backend.events.clear();

        engine
            .assemble(&mut backend, &registry, FrameSlot::new(0), 1)
            .unwrap();
        assert_eq!(
            backend.events,
            vec![
                Event::BeginPrimary(0),
                Event::BeginRenderPass(MockObject(8)),
                Event::ExecuteSecondary(secondary),
                Event::EndRenderPass,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "destroyed resource")]
    fn translating_a_collected_resource_is_fatal() {
        let mut backend = MockBackend::new(2);
        let mut registry = ResourceRegistry::new();
        let mut engine = engine(&mut backend, 4);
        let (list, pipeline) = compute_list(&mut registry, 1);

        drop(pipeline);
        registry.collect_dropped();
        let _ = engine.translate(&mut backend, &registry, FrameSlot::new(0), 0, &list);
    }
}
