//! Renderers.
//!
//! A renderer binds a shader, a set of resources (realized as backend
//! components), an output target and fixed render state, and issues draws.
//! [`RendererDescriptor`] collects the pieces; [`GraphicsDevice::create_renderer`]
//! builds the backend realization.
//!
//! Binding slots for shader-visible resources are derived here, once, in
//! ascending insertion order, and every backend consumes the same table —
//! shader source written against one backend maps slot-for-slot to the
//! other.
//!
//! [`GraphicsDevice::create_renderer`]: crate::GraphicsDevice::create_renderer

use std::sync::Arc;

use crate::backend::{ComponentRef, ComponentSource, DeviceBackend, RendererBackend};
use crate::command::ImageLayout;
use crate::device::GraphicsDevice;
use crate::error::{AcquireError, RenderError};
use crate::output::Output;
use crate::resource::{Resource, ResourceAccess, ResourceFlags, ResourceHandle};
use crate::shader::ShaderSet;
use crate::types::{BlendMode, CullMode, Extent2d, PrimitiveTopology};

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Float32 | Self::Uint32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// One vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Byte offset within one vertex.
    pub offset: u32,
}

/// Vertex input description for a graphics renderer.
///
/// Renderers that pull vertex data from storage buffers instead of a vertex
/// stream use [`VertexInput::pulling`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexInput {
    /// Byte stride of one vertex; zero for vertex pulling.
    pub stride: u32,
    /// Attributes read from the vertex stream.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexInput {
    /// A vertex stream with the given stride and attributes.
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self { stride, attributes }
    }

    /// No vertex stream; the vertex shader pulls data from bound resources.
    pub fn pulling() -> Self {
        Self::default()
    }
}

/// Fixed render state of a renderer.
///
/// Arbitrary pipeline state is out of scope; these are the supported
/// configuration switches.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    /// Framebuffer clear color, RGBA in [0, 1].
    pub clear_color: [f32; 4],
    /// Face culling mode.
    pub cull_mode: CullMode,
    /// Whether depth testing is enabled.
    pub depth_test: bool,
    /// Blending configuration.
    pub blend: BlendMode,
    /// Render triangles as wireframe. Requires the `WIREFRAME` device
    /// feature.
    pub wireframe: bool,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Compute kernel workgroup dimensions, for compute renderers.
    pub compute_kernel: [u32; 3],
    /// Block the CPU until a compute dispatch has finished executing.
    pub blocking_compute: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            cull_mode: CullMode::default(),
            depth_test: true,
            blend: BlendMode::default(),
            wireframe: false,
            topology: PrimitiveTopology::default(),
            compute_kernel: [1, 1, 1],
            blocking_compute: false,
        }
    }
}

/// An edit applied to an existing renderer.
///
/// Edits are expensive (the device is drained first); batch them rather than
/// editing per frame.
#[derive(Debug, Clone, Default)]
pub struct RendererEdit {
    /// Buffers to resize to a new byte length. Only legal for
    /// `DynamicVariable` buffer resources.
    pub buffer_resizes: Vec<(ResourceHandle, u64)>,
    /// Images to resize to new dimensions. Only legal for `DynamicVariable`
    /// image resources.
    pub image_resizes: Vec<(ResourceHandle, Extent2d)>,
    /// New compute kernel dimensions.
    pub compute_kernel: Option<[u32; 3]>,
}

impl RendererEdit {
    /// An empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize a buffer resource.
    pub fn resize_buffer(mut self, handle: ResourceHandle, new_size: u64) -> Self {
        self.buffer_resizes.push((handle, new_size));
        self
    }

    /// Resize an image resource.
    pub fn resize_image(mut self, handle: ResourceHandle, new_size: Extent2d) -> Self {
        self.image_resizes.push((handle, new_size));
        self
    }

    /// Change the compute kernel.
    pub fn set_compute_kernel(mut self, kernel: [u32; 3]) -> Self {
        self.compute_kernel = Some(kernel);
        self
    }
}

/// Frame pacing statistics, reported by the dummy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Frames submitted so far.
    pub frames: u64,
    /// Total fence waits that had to block.
    pub blocking_fence_waits: u64,
    /// Blocking fence waits in the most recent frame.
    pub last_frame_blocking_waits: u32,
    /// Maximum blocking fence waits observed in any single frame.
    pub max_blocking_waits_per_frame: u32,
}

/// Outcome of a presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    /// The swapchain is suboptimal for the surface; rendering succeeded and
    /// the caller may reconfigure at its leisure.
    pub suboptimal: bool,
}

/// Backend-facing reduction of the output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputKind {
    /// Present to the bound surface's swapchain.
    Window,
    /// Render into an owned image component.
    Offscreen { image_index: usize },
    /// Compute-only; no output attachment.
    None,
}

/// One resource entry of a descriptor: owned recipe or shared component.
enum DescriptorEntry {
    Owned(Resource),
    Referenced {
        descriptor_relevant: bool,
        component: ComponentRef,
    },
}

/// Collects everything a renderer needs before it is built.
#[derive(Default)]
pub struct RendererDescriptor {
    entries: Vec<DescriptorEntry>,
    shader: Option<ShaderSet>,
    vertex_input: Option<VertexInput>,
    output: Option<Output>,
    state: RenderState,
    label: Option<String>,
}

impl RendererDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource owned by the renderer. Returns its handle; handles are
    /// assigned in insertion order.
    pub fn add_resource(&mut self, resource: impl Into<Resource>) -> ResourceHandle {
        let handle = ResourceHandle(self.entries.len());
        self.entries.push(DescriptorEntry::Owned(resource.into()));
        handle
    }

    /// Reference a component owned by another renderer instead of creating
    /// one. The referenced renderer must outlive this one; this is a
    /// documented precondition, not enforced.
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not belong to `source`.
    pub fn ref_resource(&mut self, source: &Renderer, handle: ResourceHandle) -> ResourceHandle {
        let component = source.component_ref(handle);
        let new_handle = ResourceHandle(self.entries.len());
        self.entries.push(DescriptorEntry::Referenced {
            descriptor_relevant: source.entry_relevance[handle.0],
            component,
        });
        new_handle
    }

    /// Set the shader program.
    pub fn set_shader(&mut self, shader: ShaderSet) {
        self.shader = Some(shader);
    }

    /// Builder form of [`set_shader`](Self::set_shader).
    pub fn with_shader(mut self, shader: ShaderSet) -> Self {
        self.set_shader(shader);
        self
    }

    /// Set the vertex input description. Required for graphics renderers;
    /// use [`VertexInput::pulling`] when vertex data comes from bound
    /// resources.
    pub fn set_vertex_input(&mut self, vertex_input: VertexInput) {
        self.vertex_input = Some(vertex_input);
    }

    /// Builder form of [`set_vertex_input`](Self::set_vertex_input).
    pub fn with_vertex_input(mut self, vertex_input: VertexInput) -> Self {
        self.set_vertex_input(vertex_input);
        self
    }

    /// Set the output target.
    pub fn set_output(&mut self, output: Output) {
        self.output = Some(output);
    }

    /// Builder form of [`set_output`](Self::set_output).
    pub fn with_output(mut self, output: Output) -> Self {
        self.set_output(output);
        self
    }

    /// Mutable access to the render state.
    pub fn state_mut(&mut self) -> &mut RenderState {
        &mut self.state
    }

    /// Builder form for the whole render state.
    pub fn with_state(mut self, state: RenderState) -> Self {
        self.state = state;
        self
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Number of resources added so far.
    pub fn resource_count(&self) -> usize {
        self.entries.len()
    }
}

/// Derive binding slots for a sequence of resources given their
/// descriptor-relevance, in ascending insertion order.
///
/// Index and draw-indirect buffers occupy a component slot but no binding
/// slot. The same table is consumed by every backend, which is what makes
/// one shader's binding numbering portable across them.
pub(crate) fn derive_binding_slots(relevance: impl Iterator<Item = bool>) -> Vec<Option<u32>> {
    let mut next_slot = 0u32;
    relevance
        .map(|relevant| {
            if relevant {
                let slot = next_slot;
                next_slot += 1;
                Some(slot)
            } else {
                None
            }
        })
        .collect()
}

/// A built renderer.
///
/// Destroy (drop) renderers before the device that created them; the `Arc`
/// the renderer holds enforces the ordering.
pub struct Renderer {
    device: Arc<GraphicsDevice>,
    /// CPU-side resource stores; `None` for referenced entries.
    resources: Vec<Option<Resource>>,
    entry_relevance: Vec<bool>,
    slots: Vec<Option<u32>>,
    state: RenderState,
    output: Option<Output>,
    output_kind: OutputKind,
    vertex_count: u32,
    is_compute: bool,
    backend: RendererBackend,
    label: Option<String>,
}

impl Renderer {
    pub(crate) fn build(
        device: Arc<GraphicsDevice>,
        descriptor: RendererDescriptor,
    ) -> Result<Self, RenderError> {
        let shader = descriptor.shader.ok_or_else(|| {
            RenderError::InvalidShader("renderer has no shader set".to_string())
        })?;
        shader.validate()?;
        let is_compute = shader.is_compute();

        if !is_compute && descriptor.vertex_input.is_none() {
            return Err(RenderError::InvalidParameter(
                "graphics renderer has no vertex input description; use VertexInput::pulling() \
                 for storage-buffer vertex pulling"
                    .to_string(),
            ));
        }

        // Validate resource flag combinations.
        for (index, entry) in descriptor.entries.iter().enumerate() {
            if let DescriptorEntry::Owned(resource) = entry {
                let flags = resource.flags();
                match resource {
                    Resource::Buffer(_) => {
                        if flags.contains(ResourceFlags::RENDER_OUTPUT) {
                            return Err(RenderError::InvalidParameter(format!(
                                "resource {index}: RENDER_OUTPUT is only valid on images"
                            )));
                        }
                        if flags.contains(ResourceFlags::INDEX | ResourceFlags::DRAW_INDIRECT) {
                            return Err(RenderError::InvalidParameter(format!(
                                "resource {index}: INDEX and DRAW_INDIRECT are mutually exclusive"
                            )));
                        }
                    }
                    Resource::Image(_) => {
                        if flags.intersects(ResourceFlags::INDEX | ResourceFlags::DRAW_INDIRECT) {
                            return Err(RenderError::InvalidParameter(format!(
                                "resource {index}: buffer-only flags on an image"
                            )));
                        }
                    }
                }
            }
        }

        // Resolve the output target.
        let output_kind = match (&descriptor.output, is_compute) {
            (Some(Output::Surface(_)), _) => OutputKind::Window,
            (Some(Output::Offscreen(handle)), _) => {
                let entry = descriptor.entries.get(handle.0).ok_or_else(|| {
                    RenderError::InvalidParameter(format!(
                        "offscreen output handle {} is out of range",
                        handle.0
                    ))
                })?;
                match entry {
                    DescriptorEntry::Owned(resource @ Resource::Image(_)) => {
                        if !resource.flags().contains(ResourceFlags::RENDER_OUTPUT) {
                            return Err(RenderError::InvalidParameter(
                                "offscreen output image must carry the RENDER_OUTPUT flag"
                                    .to_string(),
                            ));
                        }
                        OutputKind::Offscreen {
                            image_index: handle.0,
                        }
                    }
                    _ => {
                        return Err(RenderError::InvalidParameter(
                            "offscreen output handle must name an owned image resource"
                                .to_string(),
                        ))
                    }
                }
            }
            (None, true) => OutputKind::None,
            (None, false) => {
                return Err(RenderError::InvalidParameter(
                    "graphics renderer has no output target".to_string(),
                ))
            }
        };

        let entry_relevance: Vec<bool> = descriptor
            .entries
            .iter()
            .map(|entry| match entry {
                DescriptorEntry::Owned(resource) => resource.descriptor_relevant(),
                DescriptorEntry::Referenced {
                    descriptor_relevant,
                    ..
                } => *descriptor_relevant,
            })
            .collect();
        let slots = derive_binding_slots(entry_relevance.iter().copied());

        // Realize components.
        let sources: Vec<ComponentSource<'_>> = descriptor
            .entries
            .iter()
            .map(|entry| match entry {
                DescriptorEntry::Owned(resource) => ComponentSource::Owned(resource),
                DescriptorEntry::Referenced { component, .. } => {
                    ComponentSource::Referenced(component.clone())
                }
            })
            .collect();

        let backend = match device.backend() {
            #[cfg(feature = "dummy")]
            DeviceBackend::Dummy(_) => RendererBackend::Dummy(
                crate::backend::dummy::DummyRenderer::new(&sources, output_kind)?,
            ),
            #[cfg(feature = "vulkan-backend")]
            DeviceBackend::Vulkan(vk_device) => {
                RendererBackend::Vulkan(crate::backend::vulkan::VulkanRenderer::new(
                    vk_device,
                    &sources,
                    &slots,
                    &shader,
                    descriptor.vertex_input.as_ref(),
                    &descriptor.state,
                    output_kind,
                    descriptor.output.as_ref(),
                )?)
            }
            #[cfg(feature = "wgpu-backend")]
            DeviceBackend::Wgpu(wgpu_device) => {
                RendererBackend::Wgpu(crate::backend::wgpu_impl::WgpuRenderer::new(
                    wgpu_device,
                    &sources,
                    &slots,
                    &shader,
                    descriptor.vertex_input.as_ref(),
                    &descriptor.state,
                    output_kind,
                    descriptor.output.as_ref(),
                )?)
            }
        };
        drop(sources);

        let resources = descriptor
            .entries
            .into_iter()
            .map(|entry| match entry {
                DescriptorEntry::Owned(resource) => Some(resource),
                DescriptorEntry::Referenced { .. } => None,
            })
            .collect();

        log::info!(
            "Created renderer {:?}: {} resources, output {:?}",
            descriptor.label,
            entry_relevance.len(),
            output_kind
        );

        Ok(Self {
            device,
            resources,
            entry_relevance,
            slots,
            state: descriptor.state,
            output: descriptor.output,
            output_kind,
            vertex_count: 0,
            is_compute,
            backend,
            label: descriptor.label,
        })
    }

    /// The device this renderer was created on.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Debug label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Number of resources (owned and referenced).
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Whether this is a compute renderer.
    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    /// The render state.
    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Change the clear color for subsequent frames.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.state.clear_color = rgba;
    }

    /// The binding slot assigned to a resource, or `None` when the resource
    /// is not descriptor-relevant (index and draw-indirect buffers).
    pub fn binding_slot(&self, handle: ResourceHandle) -> Option<u32> {
        self.slots.get(handle.0).copied().flatten()
    }

    /// Read the CPU-side data of an owned resource.
    ///
    /// Returns `None` for referenced resources; their owner holds the data.
    pub fn resource_data(&self, handle: ResourceHandle) -> Option<&[u8]> {
        self.resources
            .get(handle.0)
            .and_then(|r| r.as_ref())
            .map(|r| r.data())
    }

    /// The byte size of the backend component realizing a resource.
    pub fn component_size(&self, handle: ResourceHandle) -> u64 {
        match &self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => r.component(handle.0).size(),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.component_size(handle.0),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => r.component_size(handle.0),
        }
    }

    /// Read back the contents of a component, where the backend can.
    ///
    /// The dummy backend always can; the real backends return `None` for
    /// GPU-resident components.
    pub fn read_component(&self, handle: ResourceHandle) -> Option<Vec<u8>> {
        match &self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => Some(r.component(handle.0).read()),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.read_component(handle.0),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(_) => None,
        }
    }

    /// The tracked layout of an owned image component, where the backend
    /// tracks layouts (dummy and explicit backends).
    pub fn image_layout(&self, handle: ResourceHandle) -> Option<ImageLayout> {
        match &self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => Some(r.component(handle.0).tracked_layout()),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.image_layout(handle.0),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(_) => None,
        }
    }

    pub(crate) fn component_ref(&self, handle: ResourceHandle) -> ComponentRef {
        assert!(
            handle.0 < self.resources.len(),
            "resource handle {} does not belong to this renderer",
            handle.0
        );
        match &self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => ComponentRef::Dummy(Arc::clone(r.component(handle.0))),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => ComponentRef::Vulkan(r.component_arc(handle.0)),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => ComponentRef::Wgpu(r.component_arc(handle.0)),
        }
    }

    /// Write bytes into a dynamic owned resource.
    ///
    /// The CPU-side store is updated and the backend component is kept in
    /// sync (mapped write on the explicit backend, queued write on the
    /// implicit one). The caller must not write to a resource while a
    /// submission reading it is still pending; this is a documented
    /// precondition.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for static resources, referenced
    /// resources, unknown handles or out-of-bounds ranges.
    pub fn write_resource(
        &mut self,
        handle: ResourceHandle,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), RenderError> {
        let resource = self
            .resources
            .get_mut(handle.0)
            .ok_or_else(|| {
                RenderError::InvalidParameter(format!("unknown resource handle {}", handle.0))
            })?
            .as_mut()
            .ok_or_else(|| {
                RenderError::InvalidParameter(
                    "cannot write a referenced resource; write through its owner".to_string(),
                )
            })?;
        if !resource.access().is_dynamic() {
            return Err(RenderError::InvalidParameter(
                "cannot write a static resource after renderer creation".to_string(),
            ));
        }
        if offset + bytes.len() > resource.data().len() {
            return Err(RenderError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds resource size {}",
                bytes.len(),
                offset,
                resource.data().len()
            )));
        }
        resource.write(offset, bytes);
        match &mut self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => r.write_component(handle.0, offset, bytes),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.write_component(handle.0, offset, bytes),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => r.write_component(handle.0, offset, bytes),
        }
        Ok(())
    }

    /// Apply an edit: component resizes and compute-kernel changes.
    ///
    /// The device is drained (`wait_idle`) before any component is touched,
    /// then each resize allocates the new component, copies the preserved
    /// prefix, zero-fills growth, and swaps it in place of the old one —
    /// atomic from the caller's point of view.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a resize names a resource that is
    /// not an owned `DynamicVariable` resource of the right kind.
    pub fn edit(&mut self, edit: RendererEdit) -> Result<(), RenderError> {
        // Validate everything before mutating anything.
        for (handle, _) in &edit.buffer_resizes {
            let resource = self.owned_resource(*handle)?;
            if !matches!(resource, Resource::Buffer(_)) {
                return Err(RenderError::InvalidParameter(format!(
                    "buffer resize names resource {} which is not a buffer",
                    handle.0
                )));
            }
            if resource.access() != ResourceAccess::DynamicVariable {
                return Err(RenderError::InvalidParameter(format!(
                    "resource {} is not DynamicVariable and cannot be resized",
                    handle.0
                )));
            }
        }
        for (handle, _) in &edit.image_resizes {
            let resource = self.owned_resource(*handle)?;
            if !matches!(resource, Resource::Image(_)) {
                return Err(RenderError::InvalidParameter(format!(
                    "image resize names resource {} which is not an image",
                    handle.0
                )));
            }
            if resource.access() != ResourceAccess::DynamicVariable {
                return Err(RenderError::InvalidParameter(format!(
                    "resource {} is not DynamicVariable and cannot be resized",
                    handle.0
                )));
            }
        }

        if !edit.buffer_resizes.is_empty() || !edit.image_resizes.is_empty() {
            // Resizes recreate live allocations; drain the GPU first.
            self.device.wait_idle();
            self.wait_pending();
        }

        for (handle, new_size) in &edit.buffer_resizes {
            if let Some(Resource::Buffer(buffer)) = self.resources[handle.0].as_mut() {
                buffer.resize_bytes(*new_size as usize);
            }
            self.resize_component(handle.0, *new_size as usize);
            log::trace!("Renderer: resized buffer {} to {} bytes", handle.0, new_size);
        }
        for (handle, new_size) in &edit.image_resizes {
            let mut byte_len = 0;
            if let Some(Resource::Image(image)) = self.resources[handle.0].as_mut() {
                image.resize(*new_size);
                byte_len = image.data().len();
            }
            self.resize_image_component(handle.0, *new_size, byte_len);
            log::trace!(
                "Renderer: resized image {} to {}x{}",
                handle.0,
                new_size.width,
                new_size.height
            );
        }
        if let Some(kernel) = edit.compute_kernel {
            self.state.compute_kernel = kernel;
        }
        Ok(())
    }

    fn owned_resource(&self, handle: ResourceHandle) -> Result<&Resource, RenderError> {
        self.resources
            .get(handle.0)
            .ok_or_else(|| {
                RenderError::InvalidParameter(format!("unknown resource handle {}", handle.0))
            })?
            .as_ref()
            .ok_or_else(|| {
                RenderError::InvalidParameter(format!(
                    "resource {} is referenced, not owned, and cannot be edited here",
                    handle.0
                ))
            })
    }

    fn resize_component(&mut self, index: usize, new_size: usize) {
        match &mut self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => r.resize_component(index, new_size),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.resize_component(index, new_size),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => r.resize_component(index, new_size),
        }
    }

    fn resize_image_component(&mut self, index: usize, new_size: Extent2d, byte_len: usize) {
        match &mut self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => r.resize_component(index, byte_len),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.resize_image_component(index, new_size),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => r.resize_image_component(index, new_size, byte_len),
        }
    }

    fn wait_pending(&mut self) {
        match &mut self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => r.wait_pending(),
            #[cfg(feature = "vulkan-backend")]
            RendererBackend::Vulkan(r) => r.wait_pending(),
            #[cfg(feature = "wgpu-backend")]
            RendererBackend::Wgpu(r) => r.wait_pending(),
        }
    }

    /// Output dimensions, dispatching on the output kind: the surface's
    /// configured size for window output, the image's dimensions for
    /// offscreen output.
    pub fn output_dimensions(&self) -> Option<Extent2d> {
        match (&self.output, self.output_kind) {
            (Some(Output::Surface(surface)), _) => surface
                .config()
                .map(|c| Extent2d::new(c.width, c.height)),
            (_, OutputKind::Offscreen { image_index }) => {
                match self.resources.get(image_index).and_then(|r| r.as_ref()) {
                    Some(Resource::Image(image)) => Some(image.size()),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Issue one draw (or compute dispatch) with the vertex count of the
    /// previous call; zero vertices on the first call.
    ///
    /// For window output this runs the full frame: wait the slot fence,
    /// acquire, record, submit, present, rotate. On
    /// [`AcquireError::OutOfDate`] / [`AcquireError::SurfaceLost`] the
    /// caller must reconfigure the surface and retry.
    ///
    /// # Errors
    ///
    /// Recoverable and fatal acquisition failures; see [`AcquireError`].
    pub fn render(&mut self) -> Result<FrameReport, AcquireError> {
        match self.output_kind {
            OutputKind::Window => {
                let surface = match &self.output {
                    Some(Output::Surface(surface)) => Arc::clone(surface),
                    _ => unreachable!("window output without a surface"),
                };
                let mut surface_backend = surface.backend_mut();
                match (&mut self.backend, &mut *surface_backend) {
                    #[cfg(feature = "dummy")]
                    (
                        RendererBackend::Dummy(r),
                        crate::backend::SurfaceBackend::Dummy(s),
                    ) => {
                        let acquired = r.render_windowed(s)?;
                        Ok(FrameReport {
                            suboptimal: acquired.suboptimal,
                        })
                    }
                    #[cfg(feature = "vulkan-backend")]
                    (
                        RendererBackend::Vulkan(r),
                        crate::backend::SurfaceBackend::Vulkan(s),
                    ) => {
                        let acquired = r.render_windowed(s, &self.state, self.vertex_count)?;
                        Ok(FrameReport {
                            suboptimal: acquired.suboptimal,
                        })
                    }
                    #[cfg(feature = "wgpu-backend")]
                    (
                        RendererBackend::Wgpu(r),
                        crate::backend::SurfaceBackend::Wgpu(s),
                    ) => {
                        let acquired = r.render_windowed(s, &self.state, self.vertex_count)?;
                        Ok(FrameReport {
                            suboptimal: acquired.suboptimal,
                        })
                    }
                    #[allow(unreachable_patterns)]
                    _ => Err(AcquireError::Other(
                        "renderer and surface were created by different backends".to_string(),
                    )),
                }
            }
            OutputKind::Offscreen { .. } | OutputKind::None => {
                let block = self.is_compute && self.state.blocking_compute;
                match &mut self.backend {
                    #[cfg(feature = "dummy")]
                    RendererBackend::Dummy(r) => r.render_offscreen(block),
                    #[cfg(feature = "vulkan-backend")]
                    RendererBackend::Vulkan(r) => {
                        r.render_offscreen(&self.state, self.vertex_count, block)
                    }
                    #[cfg(feature = "wgpu-backend")]
                    RendererBackend::Wgpu(r) => {
                        r.render_offscreen(&self.state, self.vertex_count, block)
                    }
                }
                Ok(FrameReport::default())
            }
        }
    }

    /// Issue one draw of `vertex_count` vertices. The count persists for
    /// subsequent [`render`](Self::render) calls.
    ///
    /// # Errors
    ///
    /// As [`render`](Self::render).
    pub fn render_vertices(&mut self, vertex_count: u32) -> Result<FrameReport, AcquireError> {
        self.vertex_count = vertex_count;
        self.render()
    }

    /// Frame pacing statistics; `Some` only on the dummy backend.
    pub fn frame_stats(&self) -> Option<FrameStats> {
        match &self.backend {
            #[cfg(feature = "dummy")]
            RendererBackend::Dummy(r) => Some(r.stats()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("label", &self.label)
            .field("resources", &self.resources.len())
            .field("output", &self.output_kind)
            .field("compute", &self.is_compute)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_derivation_ascends_in_insertion_order() {
        // buffer, index buffer, image, buffer
        let slots = derive_binding_slots([true, false, true, true].into_iter());
        assert_eq!(slots, vec![Some(0), None, Some(1), Some(2)]);
    }

    #[test]
    fn slot_derivation_is_deterministic() {
        let relevance = [true, true, false, true, false, true];
        let first = derive_binding_slots(relevance.into_iter());
        let second = derive_binding_slots(relevance.into_iter());
        assert_eq!(first, second);
        // Earlier insertion never gets a higher slot.
        let assigned: Vec<u32> = first.into_iter().flatten().collect();
        assert!(assigned.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn render_state_defaults() {
        let state = RenderState::default();
        assert_eq!(state.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(state.depth_test);
        assert!(!state.wireframe);
        assert_eq!(state.compute_kernel, [1, 1, 1]);
    }

    #[test]
    fn vertex_input_pulling_is_empty() {
        let input = VertexInput::pulling();
        assert_eq!(input.stride, 0);
        assert!(input.attributes.is_empty());
        assert_eq!(VertexFormat::Float32x3.size(), 12);
    }
}
