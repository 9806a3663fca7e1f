//! The Vulkan realization of a renderer.
//!
//! Owns the descriptor table derived from the front-end binding slots, the
//! render pass and framebuffers for the output target, the pipeline compiled
//! from SPIR-V, and the per-slot command buffers driven through the shared
//! recording state machine and frame pacing.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::component::VulkanComponent;
use super::conversion::{
    convert_compare_op, convert_cull_mode, convert_topology, convert_vertex_format,
};
use super::swapchain::VulkanSurface;
use super::sync::FrameSync;
use super::VulkanDevice;
use crate::backend::ComponentSource;
use crate::command::{CommandBufferState, CommandStateMachine, ImageLayout};
use crate::error::{AcquireError, RenderError};
use crate::frame::FRAMES_IN_FLIGHT;
use crate::output::Output;
use crate::renderer::{OutputKind, RenderState, VertexInput};
use crate::resource::Resource;
use crate::shader::{ShaderArtifact, ShaderSet, ShaderStage};
use crate::types::{BlendMode, CompareFunction};

pub(crate) struct VulkanRenderer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    queue: vk::Queue,
    command_pool: vk::CommandPool,

    components: Vec<Arc<VulkanComponent>>,
    slots: Vec<Option<u32>>,

    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,

    shader_modules: Vec<vk::ShaderModule>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    is_compute: bool,

    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    framebuffer_extent: vk::Extent2D,

    sync: FrameSync,
    command_buffers: Vec<vk::CommandBuffer>,
    command_state: Vec<CommandStateMachine>,

    output_kind: OutputKind,
    bound_generation: Option<u64>,
}

impl VulkanRenderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        vk_device: &VulkanDevice,
        sources: &[ComponentSource<'_>],
        slots: &[Option<u32>],
        shader: &ShaderSet,
        vertex_input: Option<&VertexInput>,
        state: &RenderState,
        output_kind: OutputKind,
        output: Option<&Output>,
    ) -> Result<Self, RenderError> {
        let device = vk_device.device().clone();
        let allocator = vk_device.allocator();
        let is_compute = shader.is_compute();

        // Realize components; remember which owned resources still need a
        // one-shot upload.
        let mut components: Vec<Arc<VulkanComponent>> = Vec::with_capacity(sources.len());
        let mut static_uploads: Vec<(usize, &Resource)> = Vec::new();
        for (index, source) in sources.iter().enumerate() {
            match source {
                ComponentSource::Owned(resource) => {
                    let component = match resource {
                        Resource::Buffer(_) => {
                            VulkanComponent::new_buffer(&device, &allocator, resource)?
                        }
                        Resource::Image(_) => {
                            VulkanComponent::new_image(&device, &allocator, resource)?
                        }
                    };
                    if !resource.access().is_dynamic() {
                        static_uploads.push((index, resource));
                    }
                    components.push(Arc::new(component));
                }
                ComponentSource::Referenced(reference) => match reference {
                    crate::backend::ComponentRef::Vulkan(component) => {
                        components.push(Arc::clone(component))
                    }
                    #[allow(unreachable_patterns)]
                    _ => {
                        return Err(RenderError::Internal(
                            "referenced component from a different backend".to_string(),
                        ))
                    }
                },
            }
        }

        // Descriptor table in the shared slot order.
        let (set_layout, descriptor_pool, descriptor_set) =
            create_descriptors(&device, &components, slots)?;

        // Pipeline layout.
        let set_layouts = [set_layout];
        let layout_info = if set_layout == vk::DescriptorSetLayout::null() {
            vk::PipelineLayoutCreateInfo::default()
        } else {
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts)
        };
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!("pipeline layout failed: {e:?}"))
            })?;

        // Render pass for the output target (graphics only).
        let render_pass = if is_compute {
            vk::RenderPass::null()
        } else {
            let (format, final_layout) = match output_kind {
                OutputKind::Window => {
                    let format = match output {
                        Some(Output::Surface(surface)) => {
                            let backend = surface.backend();
                            match &*backend {
                                crate::backend::SurfaceBackend::Vulkan(s) => {
                                    s.data().map(|d| d.format).ok_or_else(|| {
                                        RenderError::InvalidParameter(
                                            "surface must be configured before building a \
                                             renderer against it"
                                                .to_string(),
                                        )
                                    })?
                                }
                                #[allow(unreachable_patterns)]
                                _ => {
                                    return Err(RenderError::Internal(
                                        "window output surface is not a Vulkan surface"
                                            .to_string(),
                                    ))
                                }
                            }
                        }
                        _ => {
                            return Err(RenderError::Internal(
                                "window output without a surface".to_string(),
                            ))
                        }
                    };
                    (format, vk::ImageLayout::PRESENT_SRC_KHR)
                }
                OutputKind::Offscreen { image_index } => {
                    let format = components[image_index].image_format().ok_or_else(|| {
                        RenderError::InvalidParameter(
                            "offscreen output component is not an image".to_string(),
                        )
                    })?;
                    (format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                }
                OutputKind::None => {
                    return Err(RenderError::InvalidParameter(
                        "graphics renderer requires an output target".to_string(),
                    ))
                }
            };
            create_render_pass(&device, format, final_layout)?
        };

        // Shaders and pipeline.
        let mut shader_modules = Vec::new();
        let pipeline = if is_compute {
            let module = create_shader_module(&device, shader, ShaderStage::Compute)?;
            shader_modules.push(module);
            create_compute_pipeline(&device, module, pipeline_layout)?
        } else {
            let vertex = create_shader_module(&device, shader, ShaderStage::Vertex)?;
            shader_modules.push(vertex);
            let fragment = create_shader_module(&device, shader, ShaderStage::Fragment)?;
            shader_modules.push(fragment);
            create_graphics_pipeline(
                &device,
                vertex,
                fragment,
                vertex_input,
                state,
                pipeline_layout,
                render_pass,
            )?
        };

        let sync = FrameSync::new(&device, FRAMES_IN_FLIGHT)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk_device.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(FRAMES_IN_FLIGHT as u32);
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "command buffer allocation failed: {e:?}"
                ))
            })?;
        let command_state = (0..FRAMES_IN_FLIGHT)
            .map(|_| CommandStateMachine::new())
            .collect();

        let mut renderer = Self {
            device,
            allocator,
            queue: vk_device.graphics_queue(),
            command_pool: vk_device.command_pool(),
            components,
            slots: slots.to_vec(),
            set_layout,
            descriptor_pool,
            descriptor_set,
            shader_modules,
            pipeline_layout,
            pipeline,
            is_compute,
            render_pass,
            framebuffers: Vec::new(),
            framebuffer_extent: vk::Extent2D::default(),
            sync,
            command_buffers,
            command_state,
            output_kind,
            bound_generation: None,
        };

        renderer.upload_static_resources(&static_uploads)?;
        if let OutputKind::Offscreen { image_index } = output_kind {
            renderer.create_offscreen_framebuffer(image_index)?;
        }
        Ok(renderer)
    }

    pub(crate) fn component_arc(&self, index: usize) -> Arc<VulkanComponent> {
        Arc::clone(&self.components[index])
    }

    pub(crate) fn component_size(&self, index: usize) -> u64 {
        self.components[index].size()
    }

    pub(crate) fn read_component(&self, index: usize) -> Option<Vec<u8>> {
        self.components[index].read()
    }

    pub(crate) fn image_layout(&self, index: usize) -> Option<ImageLayout> {
        let component = &self.components[index];
        component.is_image().then(|| component.tracked_layout())
    }

    pub(crate) fn write_component(&mut self, index: usize, offset: usize, bytes: &[u8]) {
        self.components[index].write(offset, bytes);
    }

    pub(crate) fn resize_component(&mut self, index: usize, new_size: usize) {
        if let Err(e) = self.components[index].resize(new_size) {
            log::error!("component resize failed: {e}");
            return;
        }
        self.update_descriptor(index);
    }

    pub(crate) fn resize_image_component(&mut self, index: usize, extent: crate::types::Extent2d) {
        if let Err(e) = self.components[index].resize_image(extent) {
            log::error!("image component resize failed: {e}");
            return;
        }
        self.update_descriptor(index);
        // A resized output image invalidates the framebuffer built over its
        // old view.
        if self.output_kind == (OutputKind::Offscreen { image_index: index }) {
            for framebuffer in self.framebuffers.drain(..) {
                unsafe { self.device.destroy_framebuffer(framebuffer, None) };
            }
            if let Err(e) = self.create_offscreen_framebuffer(index) {
                log::error!("offscreen framebuffer rebuild failed: {e}");
            }
        }
    }

    /// Wait every in-flight fence and retire pending command buffers.
    pub(crate) fn wait_pending(&mut self) {
        self.sync.wait_all();
        for slot in 0..FRAMES_IN_FLIGHT {
            self.sync.pacing.release_slot(slot);
        }
        for state in &mut self.command_state {
            if state.state() == CommandBufferState::Pending {
                state.complete();
            }
        }
    }

    /// The full acquire/record/submit/present frame.
    pub(crate) fn render_windowed(
        &mut self,
        surface: &mut VulkanSurface,
        state: &RenderState,
        vertex_count: u32,
    ) -> Result<crate::swapchain::AcquiredImage, AcquireError> {
        // Rebuild per-swapchain state after a reconfiguration.
        if self.bound_generation != surface.generation() {
            self.wait_pending();
            self.rebuild_window_framebuffers(surface)
                .map_err(|e| AcquireError::Other(e.to_string()))?;
            let image_count = surface
                .image_count()
                .ok_or_else(|| AcquireError::Other("surface not configured".to_string()))?;
            self.sync.pacing.bind_images(image_count as usize);
            self.bound_generation = surface.generation();
        }

        let frame = self.sync.pacing.current_frame();

        // 1. Wait for this slot's previous submission. The wait proves the
        // slot's prior work completed, so its image ownerships are released.
        self.sync.wait_slot(frame);
        self.sync.pacing.release_slot(frame);
        if self.command_state[frame].state() == CommandBufferState::Pending {
            self.command_state[frame].complete();
        }

        // 2. Acquire, signalling this slot's image-available semaphore. The
        // image is usable only after the submission below waits on it.
        let acquired = surface.acquire(self.sync.image_available[frame])?;
        let image_index = acquired.image_index as usize;

        // 3. Another slot may still be rendering to this image.
        if let Some(owner) = self.sync.pacing.slot_owning_image(image_index) {
            if owner != frame {
                self.sync.wait_slot(owner);
                self.sync.pacing.release_slot(owner);
                if self.command_state[owner].state() == CommandBufferState::Pending {
                    self.command_state[owner].complete();
                }
            }
        }

        // 4. Take ownership of the image.
        self.sync.pacing.claim_image(image_index);

        // 5. Record and submit with this slot's fence as completion fence.
        self.record_frame(frame, Some(image_index), state, vertex_count, surface)
            .map_err(|e| AcquireError::Other(e.to_string()))?;

        self.sync.reset_slot(frame);
        self.command_state[frame].submit();
        let wait_semaphores = [self.sync.image_available[frame]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished[frame]];
        let command_buffers = [self.command_buffers[frame]];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], self.sync.in_flight[frame])
        }
        .map_err(|e| AcquireError::Other(format!("queue submit failed: {e:?}")))?;

        // 6. Present, waiting for the render-finished semaphore.
        let present_suboptimal =
            surface.present(self.queue, self.sync.render_finished[frame], acquired.image_index)?;

        // 7. Rotate.
        self.sync.pacing.advance();

        Ok(crate::swapchain::AcquiredImage {
            image_index: acquired.image_index,
            suboptimal: acquired.suboptimal || present_suboptimal,
        })
    }

    /// Submit-only path for offscreen and compute renderers.
    pub(crate) fn render_offscreen(&mut self, state: &RenderState, vertex_count: u32, block: bool) {
        let frame = self.sync.pacing.current_frame();
        self.sync.wait_slot(frame);
        if self.command_state[frame].state() == CommandBufferState::Pending {
            self.command_state[frame].complete();
        }

        if let Err(e) = self.record_offscreen(frame, state, vertex_count) {
            log::error!("offscreen recording failed: {e}");
            return;
        }

        self.sync.reset_slot(frame);
        self.command_state[frame].submit();
        let command_buffers = [self.command_buffers[frame]];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let submitted = unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], self.sync.in_flight[frame])
        };
        if let Err(e) = submitted {
            log::error!("offscreen submit failed: {e:?}");
            return;
        }

        if block {
            self.sync.wait_slot(frame);
            self.command_state[frame].complete();
        }
        self.sync.pacing.advance();
    }

    fn record_frame(
        &mut self,
        frame: usize,
        image_index: Option<usize>,
        state: &RenderState,
        vertex_count: u32,
        surface: &mut VulkanSurface,
    ) -> Result<(), RenderError> {
        let cmd = self.command_buffers[frame];
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(record_err)?;

        self.command_state[frame].begin_recording();
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(record_err)?;

        let image_index = image_index.expect("windowed recording without an image index");
        let framebuffer = self.framebuffers[image_index];
        let extent = self.framebuffer_extent;

        self.command_state[frame].begin_render_pass();
        self.begin_pass_commands(cmd, framebuffer, extent, state, vertex_count);
        unsafe { self.device.cmd_end_render_pass(cmd) };
        self.command_state[frame].end_render_pass();
        // Render-pass exit is where the attachment's tracked layout moves to
        // the declared final layout.
        if let Some(data) = surface.data_mut() {
            data.layouts[image_index].transition_to(ImageLayout::Present);
        }

        self.command_state[frame].end_recording();
        unsafe { self.device.end_command_buffer(cmd) }.map_err(record_err)?;
        Ok(())
    }

    fn record_offscreen(
        &mut self,
        frame: usize,
        state: &RenderState,
        vertex_count: u32,
    ) -> Result<(), RenderError> {
        let cmd = self.command_buffers[frame];
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(record_err)?;

        self.command_state[frame].begin_recording();
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(record_err)?;

        if self.is_compute {
            unsafe {
                self.device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
                if self.descriptor_set != vk::DescriptorSet::null() {
                    self.device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        self.pipeline_layout,
                        0,
                        &[self.descriptor_set],
                        &[],
                    );
                }
                let [x, y, z] = state.compute_kernel;
                self.device.cmd_dispatch(cmd, x, y, z);
            }
        } else if let OutputKind::Offscreen { image_index } = self.output_kind {
            let framebuffer = self.framebuffers[0];
            let extent = self.framebuffer_extent;
            self.command_state[frame].begin_render_pass();
            self.begin_pass_commands(cmd, framebuffer, extent, state, vertex_count);
            unsafe { self.device.cmd_end_render_pass(cmd) };
            self.command_state[frame].end_render_pass();
            self.components[image_index].transition_layout(ImageLayout::ColorAttachment);
        }

        self.command_state[frame].end_recording();
        unsafe { self.device.end_command_buffer(cmd) }.map_err(record_err)?;
        Ok(())
    }

    /// Begin the render pass and record the draw.
    fn begin_pass_commands(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        state: &RenderState,
        vertex_count: u32,
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: state.clear_color,
            },
        }];
        let pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &pass_begin, vk::SubpassContents::INLINE);
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
            if self.descriptor_set != vk::DescriptorSet::null() {
                self.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[],
                );
            }
            if vertex_count > 0 {
                self.device.cmd_draw(cmd, vertex_count, 1, 0, 0);
            }
        }
    }

    fn rebuild_window_framebuffers(&mut self, surface: &VulkanSurface) -> Result<(), RenderError> {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
        let data = surface.data().ok_or_else(|| {
            RenderError::InvalidParameter("surface not configured".to_string())
        })?;
        self.framebuffer_extent = data.extent;
        self.framebuffers = data
            .views
            .iter()
            .map(|&view| {
                let attachments = [view];
                let info = vk::FramebufferCreateInfo::default()
                    .render_pass(self.render_pass)
                    .attachments(&attachments)
                    .width(data.extent.width)
                    .height(data.extent.height)
                    .layers(1);
                unsafe { self.device.create_framebuffer(&info, None) }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!("framebuffer creation failed: {e:?}"))
            })?;
        Ok(())
    }

    fn create_offscreen_framebuffer(&mut self, image_index: usize) -> Result<(), RenderError> {
        let component = &self.components[image_index];
        let view = component.image_view().ok_or_else(|| {
            RenderError::InvalidParameter("offscreen output component is not an image".to_string())
        })?;
        let extent = component.image_extent().unwrap_or_default();
        self.framebuffer_extent = extent;
        let attachments = [view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("framebuffer creation failed: {e:?}"))
        })?;
        self.framebuffers = vec![framebuffer];
        Ok(())
    }

    /// Rewrite the descriptor entry for one component after its native
    /// allocation was swapped.
    fn update_descriptor(&mut self, index: usize) {
        let Some(slot) = self.slots.get(index).copied().flatten() else {
            return;
        };
        if self.descriptor_set == vk::DescriptorSet::null() {
            return;
        }
        let component = &self.components[index];
        if let Some(buffer) = component.buffer_handle() {
            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(self.descriptor_set)
                .dst_binding(slot)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&buffer_info);
            unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        } else if let Some((view, sampler, layout)) = component.image_descriptor() {
            let image_info = [vk::DescriptorImageInfo::default()
                .image_view(view)
                .sampler(sampler)
                .image_layout(layout)];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(self.descriptor_set)
                .dst_binding(slot)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info);
            unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        }
    }

    /// One-shot staged upload of static resources, using the uniform
    /// wait-then-unsignal-then-submit fence ordering (here the fence starts
    /// unsignalled, so the wait happens after submission).
    fn upload_static_resources(
        &mut self,
        uploads: &[(usize, &Resource)],
    ) -> Result<(), RenderError> {
        // Dynamic images still need their initial layout transition even
        // when nothing is uploaded.
        let dynamic_images: Vec<usize> = self
            .components
            .iter()
            .enumerate()
            .filter(|(index, c)| {
                c.is_image()
                    && !uploads.iter().any(|(i, _)| i == index)
                    && c.tracked_layout() == ImageLayout::Undefined
            })
            .map(|(index, _)| index)
            .collect();
        if uploads.is_empty() && dynamic_images.is_empty() {
            return Ok(());
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(record_err)?[0];

        let mut machine = CommandStateMachine::new_one_shot();
        machine.begin_recording();
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(record_err)?;

        // Staging buffers must outlive the submission.
        let mut staging: Vec<(vk::Buffer, Option<Allocation>)> = Vec::new();

        for &(index, resource) in uploads {
            let component = &self.components[index];
            let data = resource.data();
            if data.is_empty() {
                continue;
            }
            let (staging_buffer, mut staging_alloc) =
                create_staging_buffer(&self.device, &self.allocator, data.len() as u64)?;
            if let Some(mapped) = staging_alloc.as_mut().and_then(|a| a.mapped_slice_mut()) {
                mapped[..data.len()].copy_from_slice(data);
            }

            if let Some(buffer) = component.buffer_handle() {
                let region = vk::BufferCopy::default().size(data.len() as u64);
                unsafe {
                    self.device
                        .cmd_copy_buffer(cmd, staging_buffer, buffer, &[region]);
                }
            } else if let Some(image) = component.image_handle() {
                let extent = component.image_extent().unwrap_or_default();
                transition_image(
                    &self.device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                component.transition_layout(ImageLayout::TransferDst);
                let region = vk::BufferImageCopy::default()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });
                unsafe {
                    self.device.cmd_copy_buffer_to_image(
                        cmd,
                        staging_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                transition_image(
                    &self.device,
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
                component.transition_layout(ImageLayout::ShaderRead);
            }
            staging.push((staging_buffer, staging_alloc));
        }

        // Dynamic (linear, host-visible) images move to GENERAL once.
        for index in dynamic_images {
            let component = &self.components[index];
            if let Some(image) = component.image_handle() {
                transition_image(
                    &self.device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                );
                component.transition_layout(ImageLayout::ShaderRead);
            }
        }

        machine.end_recording();
        unsafe { self.device.end_command_buffer(cmd) }.map_err(record_err)?;

        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&fence_info, None) }.map_err(record_err)?;
        machine.submit();
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { self.device.queue_submit(self.queue, &[submit_info], fence) }
            .map_err(record_err)?;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.map_err(record_err)?;
        machine.complete();
        debug_assert_eq!(machine.state(), CommandBufferState::Invalid);

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.command_pool, &[cmd]);
        }
        for (buffer, allocation) in staging {
            unsafe { self.device.destroy_buffer(buffer, None) };
            if let Some(allocation) = allocation {
                let _ = self.allocator.lock().free(allocation);
            }
        }
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
            }
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            for module in self.shader_modules.drain(..) {
                self.device.destroy_shader_module(module, None);
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.device
                    .destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                self.device
                    .destroy_descriptor_set_layout(self.set_layout, None);
            }
            self.device
                .free_command_buffers(self.command_pool, &self.command_buffers);
        }
    }
}

fn record_err(err: vk::Result) -> RenderError {
    RenderError::Internal(format!("command recording failed: {err:?}"))
}

fn create_staging_buffer(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    size: u64,
) -> Result<(vk::Buffer, Option<Allocation>), RenderError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(record_err)?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name: "staging",
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| RenderError::OutOfMemory(e.to_string()))?;
    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        .map_err(record_err)?;
    Ok((buffer, Some(allocation)))
}

fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass, RenderError> {
    let attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout);
    let attachments = [attachment];

    let attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let attachment_refs = [attachment_ref];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&attachment_refs);
    let subpasses = [subpass];

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    let dependencies = [dependency];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&info, None) }.map_err(|e| {
        RenderError::ResourceCreationFailed(format!("render pass creation failed: {e:?}"))
    })
}

fn create_shader_module(
    device: &ash::Device,
    shader: &ShaderSet,
    stage: ShaderStage,
) -> Result<vk::ShaderModule, RenderError> {
    let artifact = shader.stage(stage).ok_or_else(|| {
        RenderError::InvalidShader(format!("missing {stage:?} stage"))
    })?;
    let words = match artifact {
        ShaderArtifact::SpirV(words) => words,
        ShaderArtifact::Text { .. } => {
            return Err(RenderError::InvalidShader(
                "the explicit backend consumes pre-compiled SPIR-V artifacts".to_string(),
            ))
        }
    };
    let info = vk::ShaderModuleCreateInfo::default().code(words);
    unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
        RenderError::InvalidShader(format!("shader module creation failed: {e:?}"))
    })
}

fn create_descriptors(
    device: &ash::Device,
    components: &[Arc<VulkanComponent>],
    slots: &[Option<u32>],
) -> Result<(vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet), RenderError> {
    let mut bindings = Vec::new();
    let mut buffer_count = 0u32;
    let mut image_count = 0u32;
    for (component, slot) in components.iter().zip(slots) {
        let Some(slot) = slot else { continue };
        let descriptor_type = if component.is_image() {
            image_count += 1;
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        } else {
            buffer_count += 1;
            vk::DescriptorType::STORAGE_BUFFER
        };
        bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(*slot)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(
                    vk::ShaderStageFlags::VERTEX
                        | vk::ShaderStageFlags::FRAGMENT
                        | vk::ShaderStageFlags::COMPUTE,
                ),
        );
    }

    if bindings.is_empty() {
        return Ok((
            vk::DescriptorSetLayout::null(),
            vk::DescriptorPool::null(),
            vk::DescriptorSet::null(),
        ));
    }

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("descriptor layout failed: {e:?}"))
        })?;

    let mut pool_sizes = Vec::new();
    if buffer_count > 0 {
        pool_sizes.push(
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(buffer_count),
        );
    }
    if image_count > 0 {
        pool_sizes.push(
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(image_count),
        );
    }
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .pool_sizes(&pool_sizes)
        .max_sets(1);
    let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(
        |e| RenderError::ResourceCreationFailed(format!("descriptor pool failed: {e:?}")),
    )?;

    let set_layouts = [set_layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(descriptor_pool)
        .set_layouts(&set_layouts);
    let descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("descriptor allocation failed: {e:?}"))
        })?[0];

    // Write the initial component table.
    let mut buffer_infos = Vec::new();
    let mut image_infos = Vec::new();
    let mut writes: Vec<(u32, bool, usize)> = Vec::new();
    for (component, slot) in components.iter().zip(slots) {
        let Some(slot) = slot else { continue };
        if let Some(buffer) = component.buffer_handle() {
            buffer_infos.push(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE),
            );
            writes.push((*slot, false, buffer_infos.len() - 1));
        } else if let Some((view, sampler, layout)) = component.image_descriptor() {
            image_infos.push(
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(layout),
            );
            writes.push((*slot, true, image_infos.len() - 1));
        }
    }
    let write_sets: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .map(|&(slot, is_image, info_index)| {
            if is_image {
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(slot)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_infos[info_index]))
            } else {
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_infos[info_index]))
            }
        })
        .collect();
    unsafe { device.update_descriptor_sets(&write_sets, &[]) };

    Ok((set_layout, descriptor_pool, descriptor_set))
}

fn create_compute_pipeline(
    device: &ash::Device,
    module: vk::ShaderModule,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, RenderError> {
    let entry = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(entry);
    let info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);
    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
    }
    .map_err(|(_, e)| {
        RenderError::ResourceCreationFailed(format!("compute pipeline failed: {e:?}"))
    })?;
    Ok(pipelines[0])
}

fn create_graphics_pipeline(
    device: &ash::Device,
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    vertex_input: Option<&VertexInput>,
    state: &RenderState,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline, RenderError> {
    let entry = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex)
            .name(entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment)
            .name(entry),
    ];

    let mut binding_descs = Vec::new();
    let mut attribute_descs = Vec::new();
    if let Some(input) = vertex_input {
        if input.stride > 0 && !input.attributes.is_empty() {
            binding_descs.push(
                vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(input.stride)
                    .input_rate(vk::VertexInputRate::VERTEX),
            );
            for attribute in &input.attributes {
                attribute_descs.push(
                    vk::VertexInputAttributeDescription::default()
                        .location(attribute.location)
                        .binding(0)
                        .format(convert_vertex_format(attribute.format))
                        .offset(attribute.offset),
                );
            }
        }
    }
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descs)
        .vertex_attribute_descriptions(&attribute_descs);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(state.topology));

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(if state.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .cull_mode(convert_cull_mode(state.cull_mode))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // No depth attachment exists on the single-attachment pass; the state
    // is still provided so enabling depth later only needs the attachment.
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(state.depth_test)
        .depth_write_enable(state.depth_test)
        .depth_compare_op(convert_compare_op(CompareFunction::Less));

    let blend_attachment = match state.blend {
        BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA),
        BlendMode::Alpha => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA),
        BlendMode::Additive => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA),
    };
    let blend_attachments = [blend_attachment];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
    }
    .map_err(|(_, e)| {
        RenderError::ResourceCreationFailed(format!("graphics pipeline failed: {e:?}"))
    })?;
    Ok(pipelines[0])
}
