//! Per-frame synchronization primitives.
//!
//! Fixed-size arrays of image-available semaphores, render-finished
//! semaphores and in-flight fences, one per frame slot, wrapped around the
//! pure pacing bookkeeping in [`crate::frame`]. All submission paths use
//! one fence ordering: wait until signalled, unsignal, then submit with the
//! fence as completion fence.

use ash::vk;

use crate::error::RenderError;
use crate::frame::FramePacing;

pub(crate) struct FrameSync {
    device: ash::Device,
    pub(crate) image_available: Vec<vk::Semaphore>,
    pub(crate) render_finished: Vec<vk::Semaphore>,
    pub(crate) in_flight: Vec<vk::Fence>,
    pub(crate) pacing: FramePacing,
}

impl FrameSync {
    pub(crate) fn new(device: &ash::Device, frame_count: usize) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut image_available = Vec::with_capacity(frame_count);
        let mut render_finished = Vec::with_capacity(frame_count);
        let mut in_flight = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            image_available.push(
                unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(sync_err)?,
            );
            render_finished.push(
                unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(sync_err)?,
            );
            in_flight.push(unsafe { device.create_fence(&fence_info, None) }.map_err(sync_err)?);
        }

        Ok(Self {
            device: device.clone(),
            image_available,
            render_finished,
            in_flight,
            pacing: FramePacing::new(frame_count),
        })
    }

    /// CPU-block until the slot's fence signals (wait-forever).
    pub(crate) fn wait_slot(&self, slot: usize) {
        unsafe {
            let _ = self
                .device
                .wait_for_fences(&[self.in_flight[slot]], true, u64::MAX);
        }
    }

    /// Unsignal the slot's fence before reuse as a completion fence.
    pub(crate) fn reset_slot(&self, slot: usize) {
        unsafe {
            let _ = self.device.reset_fences(&[self.in_flight[slot]]);
        }
    }

    /// Wait every slot fence; used before destructive edits and teardown.
    pub(crate) fn wait_all(&self) {
        for slot in 0..self.in_flight.len() {
            self.wait_slot(slot);
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for semaphore in self.image_available.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for semaphore in self.render_finished.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for fence in self.in_flight.drain(..) {
                self.device.destroy_fence(fence, None);
            }
        }
    }
}

fn sync_err(err: vk::Result) -> RenderError {
    RenderError::ResourceCreationFailed(format!("failed to create sync primitive: {err:?}"))
}
