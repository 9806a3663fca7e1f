//! Dummy backend for testing and headless development.
//!
//! No GPU work is performed, but the full bookkeeping of the real backends
//! runs: components are realized as byte vectors, fences are simulated with
//! an explicit three-state machine that detects reuse-before-wait bugs, and
//! rendering drives the command-buffer state machine and frame pacing
//! exactly as the explicit backend does. The test suite verifies the
//! front-end semantics through this backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::command::{CommandBufferState, CommandStateMachine, ImageLayout, TrackedLayout};
use crate::error::{AcquireError, RenderError};
use crate::frame::{FramePacing, FRAMES_IN_FLIGHT};
use crate::hardware::{
    AdapterInfo, AdapterType, AdapterVendor, DeviceExtensions, DeviceFeatures, QueueCaps,
    SurfaceCaps,
};
use crate::renderer::{FrameStats, OutputKind};
use crate::resource::Resource;
use crate::swapchain::{AcquiredImage, PresentMode, SurfaceConfiguration};
use crate::types::TextureFormat;

/// The dummy backend context.
#[derive(Debug, Default)]
pub(crate) struct DummyContext;

impl DummyContext {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn name(&self) -> &'static str {
        "Dummy"
    }

    /// The dummy backend reports a single software adapter with a fixed
    /// capability set. Wireframe is deliberately absent so tests can request
    /// an unsupported feature.
    pub(crate) fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        vec![AdapterInfo {
            name: "Dummy Adapter".to_string(),
            vendor: AdapterVendor::Other(0),
            device_type: AdapterType::Software,
            supported_features: DeviceFeatures::COMPUTE | DeviceFeatures::SAMPLER_ANISOTROPY,
            supported_extensions: DeviceExtensions::SWAPCHAIN,
            surface_caps: Some(SurfaceCaps {
                formats: vec![TextureFormat::Bgra8Unorm, TextureFormat::Rgba8Unorm],
                present_modes: vec![PresentMode::Fifo, PresentMode::Immediate],
                min_image_count: 2,
                max_image_count: 4,
            }),
        }]
    }

    pub(crate) fn create_device(&self) -> DummyDevice {
        log::trace!("DummyContext: creating device");
        DummyDevice
    }
}

/// The dummy logical device. Carries no native state.
#[derive(Debug)]
pub(crate) struct DummyDevice;

impl DummyDevice {
    /// One queue family supporting everything, with present capability.
    pub(crate) fn queue_family(
        &self,
        caps: QueueCaps,
        _requires_present: bool,
    ) -> Option<(u32, QueueCaps, bool)> {
        let supported = QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER;
        if supported.contains(caps) {
            Some((0, supported, true))
        } else {
            None
        }
    }

    pub(crate) fn wait_idle(&self) {
        // Nothing in flight to wait for.
    }
}

// ============================================================================
// Simulated fences
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

/// A simulated fence with a three-state machine.
///
/// The state machine makes the frame-sync invariants observable: resetting a
/// fence whose submission was never waited on, or waiting a fence that has
/// no pending submission to satisfy it, panics instead of silently racing.
#[derive(Debug)]
pub(crate) struct SimFence {
    state: Mutex<FenceState>,
    blocking_waits: AtomicU64,
}

impl SimFence {
    /// Create a fence in the signalled state, matching the real backends'
    /// initially-signalled in-flight fences.
    pub(crate) fn new_signaled() -> Self {
        Self {
            state: Mutex::new(FenceState::Signaled),
            blocking_waits: AtomicU64::new(0),
        }
    }

    /// Wait until signalled. Returns `true` if the wait had to block on a
    /// pending submission (the simulated GPU completes it on demand).
    pub(crate) fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            FenceState::Signaled => false,
            FenceState::Pending => {
                *state = FenceState::Signaled;
                self.blocking_waits.fetch_add(1, Ordering::Relaxed);
                true
            }
            FenceState::Unsignaled => {
                panic!("fence wait would deadlock: no pending submission will signal it")
            }
        }
    }

    /// Unsignal the fence before reuse as a completion fence.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        assert_ne!(
            *state,
            FenceState::Pending,
            "fence reset while its prior submission is still pending"
        );
        *state = FenceState::Unsignaled;
    }

    /// Attach the fence to a submission as its completion fence.
    pub(crate) fn attach_submission(&self) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(
            *state,
            FenceState::Unsignaled,
            "fence must be reset before being reused as a completion fence"
        );
        *state = FenceState::Pending;
    }

    pub(crate) fn blocking_waits(&self) -> u64 {
        self.blocking_waits.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Components
// ============================================================================

/// A dummy component: the byte store standing in for the native allocation.
#[derive(Debug)]
pub(crate) struct DummyComponent {
    storage: Mutex<Vec<u8>>,
    layout: Mutex<TrackedLayout>,
}

impl DummyComponent {
    fn from_resource(resource: &Resource) -> Self {
        Self {
            storage: Mutex::new(resource.data().to_vec()),
            layout: Mutex::new(TrackedLayout::new()),
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.storage.lock().unwrap().len() as u64
    }

    pub(crate) fn read(&self) -> Vec<u8> {
        self.storage.lock().unwrap().clone()
    }

    fn write(&self, offset: usize, bytes: &[u8]) {
        let mut storage = self.storage.lock().unwrap();
        storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Out-of-place resize: the new store receives the first
    /// `min(old, new)` bytes of the old one, grown bytes are zero-filled,
    /// and the swap is the last step.
    fn resize(&self, new_size: usize) {
        let mut storage = self.storage.lock().unwrap();
        let mut replacement = vec![0u8; new_size];
        let copy_len = storage.len().min(new_size);
        replacement[..copy_len].copy_from_slice(&storage[..copy_len]);
        *storage = replacement;
    }

    pub(crate) fn tracked_layout(&self) -> ImageLayout {
        self.layout.lock().unwrap().current()
    }

    fn transition_layout(&self, new_layout: ImageLayout) {
        self.layout.lock().unwrap().transition_to(new_layout);
    }
}

// ============================================================================
// Surface / swapchain simulation
// ============================================================================

#[derive(Debug)]
struct DummySwapchain {
    image_count: u32,
    next_image: u32,
    layouts: Vec<Arc<DummyComponent>>,
    generation: u64,
}

/// Simulated window surface.
#[derive(Debug, Default)]
pub(crate) struct DummySurface {
    swapchain: Option<DummySwapchain>,
}

impl DummySurface {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// (Re)build the simulated swapchain. The image count honors the
    /// adapter-reported [min, max] range. The outgoing swapchain is the
    /// migration hint; the simulation carries its generation counter over.
    pub(crate) fn configure(
        &mut self,
        caps: &SurfaceCaps,
        config: &SurfaceConfiguration,
    ) -> Result<(), RenderError> {
        if config.width == 0 || config.height == 0 {
            return Err(RenderError::InvalidParameter(
                "surface dimensions cannot be zero".to_string(),
            ));
        }
        let image_count = caps.clamp_image_count(config.min_image_count);
        let generation = self.swapchain.as_ref().map_or(0, |old| old.generation + 1);
        let layouts = (0..image_count)
            .map(|_| {
                Arc::new(DummyComponent {
                    storage: Mutex::new(Vec::new()),
                    layout: Mutex::new(TrackedLayout::new()),
                })
            })
            .collect();
        self.swapchain = Some(DummySwapchain {
            image_count,
            next_image: 0,
            layouts,
            generation,
        });
        log::trace!(
            "DummySurface: configured {}x{} with {} images",
            config.width,
            config.height,
            image_count
        );
        Ok(())
    }

    pub(crate) fn image_count(&self) -> Option<u32> {
        self.swapchain.as_ref().map(|s| s.image_count)
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.swapchain.as_ref().map(|s| s.generation)
    }

    /// Round-robin acquisition, mirroring a FIFO-driven compositor.
    pub(crate) fn acquire(&mut self) -> Result<AcquiredImage, AcquireError> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| AcquireError::Other("surface not configured".to_string()))?;
        let index = swapchain.next_image;
        swapchain.next_image = (swapchain.next_image + 1) % swapchain.image_count;
        Ok(AcquiredImage {
            image_index: index,
            suboptimal: false,
        })
    }

    fn image_layout_slot(&self, index: u32) -> Option<Arc<DummyComponent>> {
        self.swapchain
            .as_ref()
            .and_then(|s| s.layouts.get(index as usize).cloned())
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Dummy realization of a renderer: components plus the same sync and
/// recording machinery the explicit backend runs.
#[derive(Debug)]
pub(crate) struct DummyRenderer {
    components: Vec<Arc<DummyComponent>>,
    fences: Vec<SimFence>,
    commands: Vec<CommandStateMachine>,
    pacing: FramePacing,
    output: OutputKind,
    bound_generation: Option<u64>,
    stats: FrameStats,
}

impl DummyRenderer {
    pub(crate) fn new(
        entries: &[super::ComponentSource<'_>],
        output: OutputKind,
    ) -> Result<Self, RenderError> {
        let components = entries
            .iter()
            .map(|entry| match entry {
                super::ComponentSource::Owned(resource) => {
                    // Static upload and dynamic mapping share one store here;
                    // both end up as a copy of the resource payload.
                    Arc::new(DummyComponent::from_resource(resource))
                }
                super::ComponentSource::Referenced(component) => match component {
                    super::ComponentRef::Dummy(c) => Arc::clone(c),
                    #[allow(unreachable_patterns)]
                    _ => unreachable!("referenced component from a different backend"),
                },
            })
            .collect();

        // The one-shot upload path of the real backend, exercised so the
        // state machine transitions stay covered. Ordering is the uniform
        // wait-then-unsignal-then-submit used by every submission path.
        let mut upload = CommandStateMachine::new_one_shot();
        let upload_fence = SimFence::new_signaled();
        upload.begin_recording();
        upload.end_recording();
        upload_fence.wait();
        upload_fence.reset();
        upload.submit();
        upload_fence.attach_submission();
        upload_fence.wait();
        upload.complete();
        debug_assert_eq!(upload.state(), CommandBufferState::Invalid);

        Ok(Self {
            components,
            fences: (0..FRAMES_IN_FLIGHT).map(|_| SimFence::new_signaled()).collect(),
            commands: (0..FRAMES_IN_FLIGHT).map(|_| CommandStateMachine::new()).collect(),
            pacing: FramePacing::new(FRAMES_IN_FLIGHT),
            output,
            bound_generation: None,
            stats: FrameStats::default(),
        })
    }

    pub(crate) fn component(&self, index: usize) -> &Arc<DummyComponent> {
        &self.components[index]
    }

    pub(crate) fn write_component(&self, index: usize, offset: usize, bytes: &[u8]) {
        self.components[index].write(offset, bytes);
    }

    pub(crate) fn resize_component(&self, index: usize, new_size: usize) {
        self.components[index].resize(new_size);
    }

    pub(crate) fn stats(&self) -> FrameStats {
        let mut stats = self.stats;
        stats.blocking_fence_waits = self.fences.iter().map(|f| f.blocking_waits()).sum();
        stats
    }

    /// Wait all slot fences; used before destructive edits.
    pub(crate) fn wait_pending(&mut self) {
        for (slot, fence) in self.fences.iter().enumerate() {
            fence.wait();
            self.pacing.release_slot(slot);
            if self.commands[slot].state() == CommandBufferState::Pending {
                self.commands[slot].complete();
            }
        }
    }

    /// The full acquire/record/submit/present frame.
    pub(crate) fn render_windowed(
        &mut self,
        surface: &mut DummySurface,
    ) -> Result<AcquiredImage, AcquireError> {
        let image_count = surface
            .image_count()
            .ok_or_else(|| AcquireError::Other("surface not configured".to_string()))? as usize;
        if self.bound_generation != surface.generation() {
            // Swapchain was (re)created; rebind pacing to the new images.
            self.wait_pending();
            self.pacing.bind_images(image_count);
            self.bound_generation = surface.generation();
        }

        let mut blocking_waits = 0u32;
        let frame = self.pacing.current_frame();

        // 1. Wait for the command buffer this slot will reuse. The wait
        // proves the slot's prior work is done, so its images are released.
        if self.fences[frame].wait() {
            blocking_waits += 1;
        }
        self.pacing.release_slot(frame);
        if self.commands[frame].state() == CommandBufferState::Pending {
            self.commands[frame].complete();
        }

        // 2. Acquire; the image-available semaphore is implicit here.
        let acquired = surface.acquire()?;
        let image_index = acquired.image_index as usize;

        // 3. A different slot may still be rendering to this image.
        if let Some(owner) = self.pacing.slot_owning_image(image_index) {
            if owner != frame {
                if self.fences[owner].wait() {
                    blocking_waits += 1;
                }
                self.pacing.release_slot(owner);
            }
        }

        // 4. Take ownership.
        self.pacing.claim_image(image_index);

        // 5. Record and submit.
        let cmd = &mut self.commands[frame];
        cmd.begin_recording();
        cmd.begin_render_pass();
        cmd.end_render_pass();
        cmd.end_recording();
        if let Some(image) = surface.image_layout_slot(acquired.image_index) {
            // Render-pass exit is the single point the tracked layout moves.
            image.transition_layout(ImageLayout::Present);
        }
        self.fences[frame].reset();
        cmd.submit();
        self.fences[frame].attach_submission();

        // 6. Present is a no-op for the simulation.
        // 7. Rotate.
        self.pacing.advance();

        self.stats.frames += 1;
        self.stats.last_frame_blocking_waits = blocking_waits;
        self.stats.max_blocking_waits_per_frame =
            self.stats.max_blocking_waits_per_frame.max(blocking_waits);
        Ok(acquired)
    }

    /// Submit-only path for offscreen and compute work; optionally blocks
    /// until the simulated execution completes.
    pub(crate) fn render_offscreen(&mut self, block: bool) {
        let frame = self.pacing.current_frame();
        if self.fences[frame].wait() {
            self.stats.last_frame_blocking_waits = 1;
        } else {
            self.stats.last_frame_blocking_waits = 0;
        }
        if self.commands[frame].state() == CommandBufferState::Pending {
            self.commands[frame].complete();
        }

        let cmd = &mut self.commands[frame];
        cmd.begin_recording();
        if matches!(self.output, OutputKind::Offscreen { .. }) {
            cmd.begin_render_pass();
            cmd.end_render_pass();
            if let OutputKind::Offscreen { image_index } = self.output {
                self.components[image_index].transition_layout(ImageLayout::ColorAttachment);
            }
        }
        cmd.end_recording();
        self.fences[frame].reset();
        cmd.submit();
        self.fences[frame].attach_submission();

        if block {
            self.fences[frame].wait();
            self.commands[frame].complete();
        }

        self.pacing.advance();
        self.stats.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_detects_reset_before_wait() {
        let fence = SimFence::new_signaled();
        fence.wait();
        fence.reset();
        fence.attach_submission();
        // Waiting satisfies the pending submission.
        assert!(fence.wait());
        fence.reset();
        fence.attach_submission();
    }

    #[test]
    #[should_panic(expected = "still pending")]
    fn fence_reset_while_pending_panics() {
        let fence = SimFence::new_signaled();
        fence.reset();
        fence.attach_submission();
        fence.reset();
    }

    #[test]
    #[should_panic(expected = "must be reset")]
    fn fence_double_submission_panics() {
        let fence = SimFence::new_signaled();
        fence.reset();
        fence.attach_submission();
        fence.wait();
        fence.attach_submission();
    }

    #[test]
    fn component_resize_copies_and_zero_fills() {
        let component = DummyComponent {
            storage: Mutex::new(vec![1, 2, 3, 4]),
            layout: Mutex::new(TrackedLayout::new()),
        };
        component.resize(6);
        assert_eq!(component.read(), vec![1, 2, 3, 4, 0, 0]);
        component.resize(2);
        assert_eq!(component.read(), vec![1, 2]);
    }

    #[test]
    fn surface_clamps_image_count() {
        let caps = SurfaceCaps {
            formats: vec![TextureFormat::Bgra8Unorm],
            present_modes: vec![PresentMode::Fifo],
            min_image_count: 2,
            max_image_count: 4,
        };
        let mut surface = DummySurface::new();
        let config = SurfaceConfiguration::new(640, 480).with_min_image_count(9);
        surface.configure(&caps, &config).unwrap();
        assert_eq!(surface.image_count(), Some(4));

        let config = SurfaceConfiguration::new(640, 480).with_min_image_count(1);
        surface.configure(&caps, &config).unwrap();
        assert_eq!(surface.image_count(), Some(2));
        // Reconfiguration advanced the generation.
        assert_eq!(surface.generation(), Some(1));
    }
}
