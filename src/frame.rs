// Frame loop
//
// begin_frame / end_frame drive the ring of frame slots. Reusing a slot first
// waits on that slot's fence, and only then runs its destruction queue, so a
// resource dropped while slot K was recording is freed once frame K has left
// the device.
//
// Between frames the current slot has already moved on, so anything retired
// then is queued behind the last submitted slot instead. Its fence covers
// every earlier submission as well.
//
// An out-of-date or suboptimal acquire, or a resize notification, turns the
// frame into a skipped frame: the swapchain is rebuilt, nothing is submitted,
// and end_frame falls back to a full idle wait before draining.

use anyhow::{Context, Result};

use crate::backend::{Acquire, Backend, Present};
use crate::command::{CommandList, ListState};
use crate::device::{Device, PassTargetKey};
use crate::error::fatal;
use crate::fatal_assert;
use crate::free_queue::FreeEntry;
use crate::registry::RawResource;
use crate::resource::Extent;

/// Index into the ring of frames in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    pub fn next(self, frames_in_flight: usize) -> Self {
        Self((self.0 + 1) % frames_in_flight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Record and submit against swapchain image `image_index`.
    Ready { image_index: u32 },
    /// Nothing will be presented this frame. Still call `end_frame`.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Open { image_index: u32 },
    Skipped,
}

pub(crate) struct FrameState {
    pub(crate) slot: FrameSlot,
    pub(crate) phase: Phase,
    last_submitted: Option<FrameSlot>,
    in_flight: Vec<bool>,
    pending_resize: Option<Extent>,
    did_resize: bool,
    frames_in_flight: usize,
    completed: u64,
}

impl FrameState {
    pub(crate) fn new(frames_in_flight: usize) -> Self {
        Self {
            slot: FrameSlot::default(),
            phase: Phase::Idle,
            last_submitted: None,
            in_flight: vec![false; frames_in_flight],
            pending_resize: None,
            did_resize: false,
            frames_in_flight,
            completed: 0,
        }
    }

    /// Slot whose fence guards an object retired right now.
    pub(crate) fn retire_slot(&self) -> FrameSlot {
        match self.phase {
            Phase::Idle => self.last_submitted.unwrap_or(self.slot),
            Phase::Open { .. } | Phase::Skipped => self.slot,
        }
    }
}

impl<B: Backend> Device<B> {
    pub fn begin_frame(&mut self) -> Result<FrameStatus> {
        fatal_assert!(
            self.frame.phase == Phase::Idle,
            "begin_frame called while a frame is already open"
        );

        let slot = self.frame.slot;
        self.frame.did_resize = false;

        if self.frame.in_flight[slot.index()] {
            self.backend
                .wait_for_fence(slot)
                .context("Failed to wait for frame fence")?;
            self.frame.in_flight[slot.index()] = false;

            let freed = self.free_queue.drain(slot, &mut self.backend);
            if freed > 0 {
                log::trace!("Slot {} released {} objects", slot.index(), freed);
            }
        }

        let extent = self
            .frame
            .pending_resize
            .unwrap_or_else(|| self.backend.drawable_extent());
        if extent.is_empty() {
            // Minimized; keep skipping until the surface has a size again
            self.frame.phase = Phase::Skipped;
            return Ok(FrameStatus::Skipped);
        }

        if self.frame.pending_resize.is_some() {
            self.recreate_swapchain()?;
            self.frame.phase = Phase::Skipped;
            return Ok(FrameStatus::Skipped);
        }

        match self.backend.acquire_image(slot).context("Failed to acquire swapchain image")? {
            Acquire::Image { index, suboptimal: false } => {
                self.backend.reset_fence(slot).context("Failed to reset frame fence")?;
                self.frame.phase = Phase::Open { image_index: index };
                Ok(FrameStatus::Ready { image_index: index })
            }
            stale => {
                log::debug!("Acquire returned {:?}, skipping frame", stale);
                self.recreate_swapchain()?;
                self.frame.phase = Phase::Skipped;
                Ok(FrameStatus::Skipped)
            }
        }
    }

    pub fn end_frame(&mut self) -> Result<()> {
        let slot = self.frame.slot;
        let phase = std::mem::replace(&mut self.frame.phase, Phase::Idle);

        match phase {
            Phase::Idle => fatal("end_frame called without a matching begin_frame"),
            Phase::Skipped => {
                self.backend.wait_idle().context("Failed to wait for device idle")?;
                self.collect_dropped();
                self.free_queue.drain(slot, &mut self.backend);
                self.engine.reset(slot);
                Ok(())
            }
            Phase::Open { image_index } => {
                let primary = self
                    .engine
                    .assemble(&mut self.backend, &self.registry, slot, image_index)?;
                self.backend
                    .submit_frame(slot, image_index, primary)
                    .context("Failed to submit frame")?;
                self.frame.in_flight[slot.index()] = true;
                self.frame.last_submitted = Some(slot);

                // Anything referenced by this frame is now covered by the fence
                self.collect_dropped();
                self.engine.reset(slot);

                let present = self.backend.present(slot, image_index).context("Failed to present")?;
                let stale = !matches!(present, Present::Presented { suboptimal: false });
                if stale || self.frame.pending_resize.is_some() {
                    self.recreate_swapchain()?;
                }

                self.frame.slot = slot.next(self.frame.frames_in_flight);
                self.frame.completed += 1;
                Ok(())
            }
        }
    }

    /// Hand a closed list to the current frame.
    pub fn submit(&mut self, list: &mut CommandList) -> Result<()> {
        fatal_assert!(
            matches!(list.state(), ListState::Closed | ListState::Submitted),
            "submit called on a CommandList in state {:?}; call end() first",
            list.state()
        );
        fatal_assert!(
            !list.is_immediate(),
            "immediate command lists are submitted with end_immediate"
        );

        match self.frame.phase {
            Phase::Idle => fatal("submit called outside begin_frame/end_frame"),
            Phase::Skipped => {
                log::debug!("Frame skipped, command list not submitted");
                Ok(())
            }
            Phase::Open { image_index } => {
                self.engine.translate(
                    &mut self.backend,
                    &self.registry,
                    self.frame.slot,
                    image_index,
                    list,
                )?;
                list.mark_submitted();
                Ok(())
            }
        }
    }

    /// Window size changed. The swapchain is rebuilt at the next frame boundary.
    pub fn notify_resized(&mut self, extent: Extent) {
        log::debug!("Resize to {}x{} requested", extent.width, extent.height);
        self.frame.pending_resize = Some(extent);
    }

    /// Whether the last begin_frame rebuilt the swapchain.
    pub fn did_swapchain_resize(&self) -> bool {
        self.frame.did_resize
    }

    pub fn frame_slot(&self) -> FrameSlot {
        self.frame.slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame.frames_in_flight
    }

    /// Number of frames submitted and presented so far.
    pub fn completed_frames(&self) -> u64 {
        self.frame.completed
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let extent = self
            .frame
            .pending_resize
            .unwrap_or_else(|| self.backend.drawable_extent());
        if extent.is_empty() {
            return Ok(());
        }
        self.frame.pending_resize = None;

        log::info!("Recreating swapchain at {}x{}", extent.width, extent.height);
        let retired = self
            .backend
            .recreate_swapchain(extent)
            .context("Failed to recreate swapchain")?;
        if let Some(old) = retired {
            self.free_queue
                .submit(self.frame.retire_slot(), FreeEntry::Resource(RawResource::Swapchain(old)));
        }

        let rebuilt = self.rebuild_passes(PassTargetKey::Swapchain, None)?;
        log::debug!("Rebuilt {} swapchain render passes", rebuilt);
        self.frame.did_resize = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Event, MockBackend};
    use crate::config::GraphicsConfig;
    use crate::resource::{PipelineKind, RenderPassDesc, RenderTarget, GraphicsPipelineDesc, ShaderResult};
    use std::cell::Cell;
    use std::rc::Rc;

    fn device(frames: usize) -> Device<MockBackend> {
        Device::new(MockBackend::new(frames), &GraphicsConfig::default()).unwrap()
    }

    fn draw_list(device: &mut Device<MockBackend>) -> (CommandList, crate::resource::RenderPass, crate::resource::Pipeline) {
        let pass = device
            .create_render_pass(&RenderPassDesc::swapchain("main"), RenderTarget::Swapchain)
            .unwrap();
        let pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineDesc::new("tri", ShaderResult::new()), &pass)
            .unwrap();
        assert_eq!(pipeline.kind(), PipelineKind::Graphics);

        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.bind_pipeline(&pipeline);
        list.draw(3, 0);
        list.end_render_pass();
        list.end();
        (list, pass, pipeline)
    }

    fn run_frame(device: &mut Device<MockBackend>, list: &mut CommandList) -> FrameStatus {
        let status = device.begin_frame().unwrap();
        device.submit(list).unwrap();
        device.end_frame().unwrap();
        status
    }

    #[test]
    fn three_frames_wait_once_and_drain_slot_zero_once() {
        let mut device = device(2);
        let (mut list, _pass, _pipeline) = draw_list(&mut device);

        for _ in 0..2 {
            assert!(matches!(run_frame(&mut device, &mut list), FrameStatus::Ready { .. }));
        }
        assert_eq!(device.backend().count(|e| matches!(e, Event::WaitFence(_))), 0);
        assert_eq!(device.drain_count(FrameSlot::new(0)), 0);

        device.begin_frame().unwrap();
        assert_eq!(device.drain_count(FrameSlot::new(0)), 1);
        assert_eq!(device.backend().count(|e| matches!(e, Event::WaitFence(_))), 1);
        assert!(device.backend().events.contains(&Event::WaitFence(0)));
        device.submit(&mut list).unwrap();
        device.end_frame().unwrap();

        assert_eq!(device.backend().count(|e| matches!(e, Event::WaitIdle)), 0);
        assert_eq!(device.backend().count(|e| matches!(e, Event::SubmitFrame(_))), 3);
        assert_eq!(device.completed_frames(), 3);
        assert_eq!(list.state(), ListState::Submitted);
    }

    #[test]
    fn submission_signals_for_the_acquired_image() {
        let mut device = device(2);
        device.backend_mut().image_count = 3;

        let mut acquired = Vec::new();
        for _ in 0..4 {
            match device.begin_frame().unwrap() {
                FrameStatus::Ready { image_index } => acquired.push(image_index),
                FrameStatus::Skipped => panic!("unexpected skip"),
            }
            device.end_frame().unwrap();
        }

        assert_eq!(acquired, vec![0, 1, 2, 0]);
        assert_eq!(device.backend().submitted_images, acquired);
    }

    #[test]
    fn clear_only_frame_begins_the_swapchain_pass() {
        let mut device = device(2);
        let pass = device
            .create_render_pass(&RenderPassDesc::swapchain("main"), RenderTarget::Swapchain)
            .unwrap();
        let mut list = CommandList::new();
        list.begin();
        list.begin_render_pass(&pass);
        list.end_render_pass();
        list.end();

        assert!(matches!(run_frame(&mut device, &mut list), FrameStatus::Ready { .. }));
        assert_eq!(device.backend().count(|e| matches!(e, Event::BeginRenderPass(_))), 1);
        assert_eq!(device.backend().count(|e| matches!(e, Event::EndRenderPass)), 1);
    }

    #[test]
    fn free_closure_runs_when_slot_comes_around() {
        let mut device = device(3);
        let ran = Rc::new(Cell::new(0));

        device.begin_frame().unwrap();
        let slot = device.frame_slot();
        let counter = ran.clone();
        device.submit_resource_free(move |_| counter.set(counter.get() + 1));
        device.end_frame().unwrap();

        for _ in 0..2 {
            device.begin_frame().unwrap();
            assert_eq!(ran.get(), 0);
            device.end_frame().unwrap();
        }

        device.begin_frame().unwrap();
        assert_eq!(device.frame_slot(), slot);
        assert_eq!(ran.get(), 1);
        device.end_frame().unwrap();

        for _ in 0..6 {
            device.begin_frame().unwrap();
            device.end_frame().unwrap();
        }
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        let mut device = device(2);
        let (mut list, _pass, _pipeline) = draw_list(&mut device);
        let ran = Rc::new(Cell::new(false));

        device.backend_mut().acquire_script.push_back(Acquire::OutOfDate);
        assert_eq!(device.begin_frame().unwrap(), FrameStatus::Skipped);
        assert!(device.did_swapchain_resize());

        let flag = ran.clone();
        device.submit_resource_free(move |_| flag.set(true));
        device.submit(&mut list).unwrap();
        assert_eq!(list.state(), ListState::Closed);

        device.backend_mut().events.clear();
        device.end_frame().unwrap();

        let events = &device.backend().events;
        assert_eq!(events.first(), Some(&Event::WaitIdle));
        assert!(!events.iter().any(|e| matches!(e, Event::Record { .. } | Event::SubmitFrame(_))));
        assert!(ran.get());
        // Retired swapchain and the old swapchain pass were drained too
        assert_eq!(device.backend().destroyed().len(), 2);

        // Slot was not advanced and its fence is still usable
        assert_eq!(device.frame_slot(), FrameSlot::new(0));
        assert!(matches!(run_frame(&mut device, &mut list), FrameStatus::Ready { .. }));
    }

    #[test]
    fn suboptimal_acquire_recreates_and_skips() {
        let mut device = device(2);
        device
            .backend_mut()
            .acquire_script
            .push_back(Acquire::Image { index: 0, suboptimal: true });

        assert_eq!(device.begin_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(
            device.backend().count(|e| matches!(e, Event::RecreateSwapchain(_))),
            1
        );
        device.end_frame().unwrap();
    }

    #[test]
    fn resize_notification_rebuilds_at_next_begin() {
        let mut device = device(2);
        device.notify_resized(Extent::new(1024, 768));

        assert_eq!(device.begin_frame().unwrap(), FrameStatus::Skipped);
        assert!(device
            .backend()
            .events
            .contains(&Event::RecreateSwapchain(Extent::new(1024, 768))));
        device.end_frame().unwrap();

        assert!(matches!(device.begin_frame().unwrap(), FrameStatus::Ready { .. }));
        assert!(!device.did_swapchain_resize());
        device.end_frame().unwrap();
    }

    #[test]
    fn zero_sized_surface_skips_without_recreating() {
        let mut device = device(2);
        device.notify_resized(Extent::new(0, 0));

        for _ in 0..3 {
            assert_eq!(device.begin_frame().unwrap(), FrameStatus::Skipped);
            device.end_frame().unwrap();
        }
        assert_eq!(
            device.backend().count(|e| matches!(e, Event::RecreateSwapchain(_))),
            0
        );

        device.notify_resized(Extent::new(640, 480));
        assert_eq!(device.begin_frame().unwrap(), FrameStatus::Skipped);
        device.end_frame().unwrap();
        assert!(matches!(device.begin_frame().unwrap(), FrameStatus::Ready { .. }));
        device.end_frame().unwrap();
    }

    #[test]
    fn out_of_date_present_recreates_after_submit() {
        let mut device = device(2);
        device.backend_mut().present_script.push_back(Present::OutOfDate);

        assert!(matches!(device.begin_frame().unwrap(), FrameStatus::Ready { .. }));
        device.end_frame().unwrap();

        assert_eq!(
            device.backend().count(|e| matches!(e, Event::RecreateSwapchain(_))),
            1
        );
        assert_eq!(device.frame_slot(), FrameSlot::new(1));
    }

    #[test]
    fn dropped_pass_outlives_the_frame_that_used_it() {
        let mut device = device(2);
        let (mut list, pass, pipeline) = draw_list(&mut device);

        device.begin_frame().unwrap();
        device.submit(&mut list).unwrap();
        drop(pass);
        drop(pipeline);
        device.end_frame().unwrap();
        assert!(device.backend().destroyed().is_empty());

        device.begin_frame().unwrap();
        device.end_frame().unwrap();
        assert!(device.backend().destroyed().is_empty());

        device.begin_frame().unwrap();
        assert_eq!(device.backend().destroyed().len(), 2);
        device.end_frame().unwrap();
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn double_begin_frame_is_fatal() {
        let mut device = device(2);
        device.begin_frame().unwrap();
        let _ = device.begin_frame();
    }

    #[test]
    #[should_panic(expected = "without a matching begin_frame")]
    fn end_frame_without_begin_is_fatal() {
        let mut device = device(2);
        let _ = device.end_frame();
    }

    #[test]
    #[should_panic(expected = "call end() first")]
    fn submitting_a_recording_list_is_fatal() {
        let mut device = device(2);
        let mut list = CommandList::new();
        list.begin();
        device.begin_frame().unwrap();
        let _ = device.submit(&mut list);
    }

    #[test]
    #[should_panic(expected = "outside begin_frame")]
    fn submit_outside_a_frame_is_fatal() {
        let mut device = device(2);
        let mut list = CommandList::new();
        list.begin();
        list.end();
        let _ = device.submit(&mut list);
    }
}
