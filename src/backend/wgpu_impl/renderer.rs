//! The wgpu realization of a renderer.
//!
//! The shared binding-slot table maps onto two bind groups: group 0 holds
//! storage buffers and sampled textures at their slot numbers, group 1 holds
//! the matching samplers (wgpu has no combined image-sampler binding). A
//! shader written against the explicit backend's slot numbering therefore
//! compiles against `@group(0) @binding(slot)` plus `@group(1)
//! @binding(slot)` for samplers, preserving the table bit-for-bit.

use std::sync::Arc;

use super::component::WgpuComponent;
use super::conversion::{
    convert_cull_mode, convert_topology, convert_vertex_format,
};
use super::swapchain::WgpuSurface;
use super::WgpuDevice;
use crate::backend::ComponentSource;
use crate::error::{AcquireError, RenderError};
use crate::renderer::{OutputKind, RenderState, VertexInput};
use crate::resource::Resource;
use crate::shader::{ShaderArtifact, ShaderSet, ShaderStage};
use crate::swapchain::AcquiredImage;
use crate::types::BlendMode;

pub(crate) struct WgpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,

    components: Vec<Arc<WgpuComponent>>,
    slots: Vec<Option<u32>>,

    resource_layout: Option<wgpu::BindGroupLayout>,
    sampler_layout: Option<wgpu::BindGroupLayout>,
    resource_group: Option<wgpu::BindGroup>,
    sampler_group: Option<wgpu::BindGroup>,

    pipeline: PipelineKind,
    output_kind: OutputKind,
}

enum PipelineKind {
    Graphics(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

impl WgpuRenderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        wgpu_device: &WgpuDevice,
        sources: &[ComponentSource<'_>],
        slots: &[Option<u32>],
        shader: &ShaderSet,
        vertex_input: Option<&VertexInput>,
        state: &RenderState,
        output_kind: OutputKind,
        output: Option<&crate::output::Output>,
    ) -> Result<Self, RenderError> {
        let device = wgpu_device.device().clone();
        let queue = wgpu_device.queue().clone();

        let mut components: Vec<Arc<WgpuComponent>> = Vec::with_capacity(sources.len());
        for source in sources {
            match source {
                ComponentSource::Owned(resource) => {
                    let component = match resource {
                        Resource::Buffer(_) => {
                            WgpuComponent::new_buffer(&device, &queue, resource)?
                        }
                        Resource::Image(_) => {
                            WgpuComponent::new_texture(&device, &queue, resource)?
                        }
                    };
                    components.push(Arc::new(component));
                }
                ComponentSource::Referenced(reference) => match reference {
                    crate::backend::ComponentRef::Wgpu(component) => {
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

        let (resource_layout, sampler_layout) = create_layouts(&device, &components, slots);

        let mut layouts: Vec<&wgpu::BindGroupLayout> = Vec::new();
        if let Some(layout) = &resource_layout {
            layouts.push(layout);
        }
        if let Some(layout) = &sampler_layout {
            layouts.push(layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("renderer pipeline layout"),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        let pipeline = if shader.is_compute() {
            let module = create_shader_module(&device, shader, ShaderStage::Compute)?;
            PipelineKind::Compute(device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some("compute pipeline"),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: None,
                    compilation_options: Default::default(),
                    cache: None,
                },
            ))
        } else {
            let target_format = match output_kind {
                OutputKind::Window => match output {
                    Some(crate::output::Output::Surface(surface)) => {
                        let backend = surface.backend();
                        match &*backend {
                            crate::backend::SurfaceBackend::Wgpu(s) => {
                                s.format().ok_or_else(|| {
                                    RenderError::InvalidParameter(
                                        "surface must be configured before building a renderer \
                                         against it"
                                            .to_string(),
                                    )
                                })?
                            }
                            #[allow(unreachable_patterns)]
                            _ => {
                                return Err(RenderError::Internal(
                                    "window output surface is not a wgpu surface".to_string(),
                                ))
                            }
                        }
                    }
                    _ => {
                        return Err(RenderError::Internal(
                            "window output without a surface".to_string(),
                        ))
                    }
                },
                OutputKind::Offscreen { image_index } => {
                    let format = components[image_index].texture_format().ok_or_else(|| {
                        RenderError::InvalidParameter(
                            "offscreen output component is not a texture".to_string(),
                        )
                    })?;
                    super::conversion::convert_texture_format(format)
                }
                OutputKind::None => {
                    return Err(RenderError::InvalidParameter(
                        "graphics renderer requires an output target".to_string(),
                    ))
                }
            };

            let vertex_module = create_shader_module(&device, shader, ShaderStage::Vertex)?;
            let fragment_module = create_shader_module(&device, shader, ShaderStage::Fragment)?;

            let mut attributes = Vec::new();
            let mut buffers = Vec::new();
            if let Some(input) = vertex_input {
                if input.stride > 0 && !input.attributes.is_empty() {
                    for attribute in &input.attributes {
                        attributes.push(wgpu::VertexAttribute {
                            format: convert_vertex_format(attribute.format),
                            offset: u64::from(attribute.offset),
                            shader_location: attribute.location,
                        });
                    }
                    buffers.push(wgpu::VertexBufferLayout {
                        array_stride: u64::from(input.stride),
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    });
                }
            }

            let blend = match state.blend {
                BlendMode::Opaque => None,
                BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
                BlendMode::Additive => Some(wgpu::BlendState {
                    color: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::One,
                        dst_factor: wgpu::BlendFactor::One,
                        operation: wgpu::BlendOperation::Add,
                    },
                    alpha: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::One,
                        dst_factor: wgpu::BlendFactor::One,
                        operation: wgpu::BlendOperation::Add,
                    },
                }),
            };

            PipelineKind::Graphics(device.create_render_pipeline(
                &wgpu::RenderPipelineDescriptor {
                    label: Some("render pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: None,
                        compilation_options: Default::default(),
                        buffers: &buffers,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: None,
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: target_format,
                            blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: convert_topology(state.topology),
                        cull_mode: convert_cull_mode(state.cull_mode),
                        front_face: wgpu::FrontFace::Ccw,
                        polygon_mode: if state.wireframe {
                            wgpu::PolygonMode::Line
                        } else {
                            wgpu::PolygonMode::Fill
                        },
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                },
            ))
        };

        let mut renderer = Self {
            device,
            queue,
            components,
            slots: slots.to_vec(),
            resource_layout,
            sampler_layout,
            resource_group: None,
            sampler_group: None,
            pipeline,
            output_kind,
        };
        renderer.rebuild_bind_groups();
        Ok(renderer)
    }

    pub(crate) fn component_arc(&self, index: usize) -> Arc<WgpuComponent> {
        Arc::clone(&self.components[index])
    }

    pub(crate) fn component_size(&self, index: usize) -> u64 {
        self.components[index].size()
    }

    pub(crate) fn write_component(&mut self, index: usize, offset: usize, bytes: &[u8]) {
        self.components[index].write(offset, bytes);
    }

    pub(crate) fn resize_component(&mut self, index: usize, new_size: usize) {
        self.components[index].resize(new_size);
        self.rebuild_bind_groups();
    }

    pub(crate) fn resize_image_component(
        &mut self,
        index: usize,
        new_extent: crate::types::Extent2d,
        byte_len: usize,
    ) {
        self.components[index].resize_image(new_extent, byte_len);
        self.rebuild_bind_groups();
    }

    pub(crate) fn wait_pending(&mut self) {
        let _ = self.device.poll(wgpu::PollType::Wait);
    }

    /// Acquire, record, submit, present. The driver does the fencing.
    pub(crate) fn render_windowed(
        &mut self,
        surface: &mut WgpuSurface,
        state: &RenderState,
        vertex_count: u32,
    ) -> Result<AcquiredImage, AcquireError> {
        let frame = surface.acquire()?;
        let suboptimal = frame.suboptimal;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.encode_and_submit(&view, state, vertex_count);
        frame.present();

        Ok(AcquiredImage {
            image_index: 0,
            suboptimal,
        })
    }

    /// Offscreen or compute submission; blocks when asked to.
    pub(crate) fn render_offscreen(&mut self, state: &RenderState, vertex_count: u32, block: bool) {
        match self.output_kind {
            OutputKind::Offscreen { image_index } => {
                if let Some(view) = self.components[image_index].texture_view() {
                    self.encode_and_submit(&view, state, vertex_count);
                }
            }
            _ => {
                // Compute-only.
                self.encode_and_submit_compute(state);
            }
        }
        if block {
            let _ = self.device.poll(wgpu::PollType::Wait);
        }
    }

    fn encode_and_submit(&self, view: &wgpu::TextureView, state: &RenderState, vertex_count: u32) {
        if matches!(self.pipeline, PipelineKind::Compute(_)) {
            self.encode_and_submit_compute(state);
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer encoder"),
            });
        {
            let [r, g, b, a] = state.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("renderer pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(r),
                            g: f64::from(g),
                            b: f64::from(b),
                            a: f64::from(a),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let PipelineKind::Graphics(pipeline) = &self.pipeline {
                pass.set_pipeline(pipeline);
                let mut group_index = 0;
                if let Some(group) = &self.resource_group {
                    pass.set_bind_group(group_index, group, &[]);
                    group_index += 1;
                }
                if let Some(group) = &self.sampler_group {
                    pass.set_bind_group(group_index, group, &[]);
                }
                if vertex_count > 0 {
                    pass.draw(0..vertex_count, 0..1);
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encode_and_submit_compute(&self, state: &RenderState) {
        let PipelineKind::Compute(pipeline) = &self.pipeline else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compute encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compute pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            let mut group_index = 0;
            if let Some(group) = &self.resource_group {
                pass.set_bind_group(group_index, group, &[]);
                group_index += 1;
            }
            if let Some(group) = &self.sampler_group {
                pass.set_bind_group(group_index, group, &[]);
            }
            let [x, y, z] = state.compute_kernel;
            pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Rebuild the bind groups from the current component handles; needed
    /// after any resize swaps a native object.
    fn rebuild_bind_groups(&mut self) {
        let Some(resource_layout) = &self.resource_layout else {
            return;
        };

        // Clone handles out so the locks are not held across creation.
        let mut buffer_handles: Vec<(u32, wgpu::Buffer)> = Vec::new();
        let mut view_handles: Vec<(u32, wgpu::TextureView)> = Vec::new();
        let mut sampler_handles: Vec<(u32, wgpu::Sampler)> = Vec::new();
        for (component, slot) in self.components.iter().zip(&self.slots) {
            let Some(slot) = slot else { continue };
            if let Some(buffer) = component.buffer() {
                buffer_handles.push((*slot, buffer));
            } else if let Some(view) = component.texture_view() {
                view_handles.push((*slot, view));
                if let Some(sampler) = component.sampler() {
                    sampler_handles.push((*slot, sampler));
                }
            }
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = Vec::new();
        for (slot, buffer) in &buffer_handles {
            entries.push(wgpu::BindGroupEntry {
                binding: *slot,
                resource: buffer.as_entire_binding(),
            });
        }
        for (slot, view) in &view_handles {
            entries.push(wgpu::BindGroupEntry {
                binding: *slot,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        self.resource_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("resource bind group"),
            layout: resource_layout,
            entries: &entries,
        }));

        if let Some(sampler_layout) = &self.sampler_layout {
            let sampler_entries: Vec<wgpu::BindGroupEntry> = sampler_handles
                .iter()
                .map(|(slot, sampler)| wgpu::BindGroupEntry {
                    binding: *slot,
                    resource: wgpu::BindingResource::Sampler(sampler),
                })
                .collect();
            self.sampler_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sampler bind group"),
                layout: sampler_layout,
                entries: &sampler_entries,
            }));
        }
    }
}

fn create_shader_module(
    device: &wgpu::Device,
    shader: &ShaderSet,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, RenderError> {
    let artifact = shader
        .stage(stage)
        .ok_or_else(|| RenderError::InvalidShader(format!("missing {stage:?} stage")))?;
    let source = match artifact {
        ShaderArtifact::Text { source, .. } => source,
        ShaderArtifact::SpirV(_) => {
            return Err(RenderError::InvalidShader(
                "the implicit backend consumes preprocessed WGSL text artifacts".to_string(),
            ))
        }
    };
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("renderer shader"),
        source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
    }))
}

/// Build bind group layouts mirroring the shared slot table: group 0 for
/// buffers and textures at their slot numbers, group 1 for samplers.
fn create_layouts(
    device: &wgpu::Device,
    components: &[Arc<WgpuComponent>],
    slots: &[Option<u32>],
) -> (Option<wgpu::BindGroupLayout>, Option<wgpu::BindGroupLayout>) {
    let mut resource_entries = Vec::new();
    let mut sampler_entries = Vec::new();
    for (component, slot) in components.iter().zip(slots) {
        let Some(slot) = slot else { continue };
        if component.is_texture() {
            resource_entries.push(wgpu::BindGroupLayoutEntry {
                binding: *slot,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            sampler_entries.push(wgpu::BindGroupLayoutEntry {
                binding: *slot,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        } else {
            resource_entries.push(wgpu::BindGroupLayoutEntry {
                binding: *slot,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
    }

    let resource_layout = (!resource_entries.is_empty()).then(|| {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("resource bind group layout"),
            entries: &resource_entries,
        })
    });
    let sampler_layout = (!sampler_entries.is_empty()).then(|| {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sampler bind group layout"),
            entries: &sampler_entries,
        })
    });
    (resource_layout, sampler_layout)
}
