//! Renderer, resource and frame-loop integration tests, driven through the
//! dummy backend. The dummy backend shares the binding-slot derivation,
//! command-recording state machine and frame pacing with the real backends,
//! so these tests pin the front-end semantics without GPU hardware.

use std::sync::Arc;

use render_core::{
    BackendKind, BufferResource, DeviceRequest, Extent2d, GraphicsDevice, GraphicsInstance,
    ImageLayout, ImageResource, Output, RendererDescriptor, RendererEdit, ResourceAccess,
    ResourceFlags, ShaderArtifact, ShaderSet, ShaderStage, Surface, SurfaceConfiguration,
    TextureFormat, VertexInput, FRAMES_IN_FLIGHT,
};

fn test_device() -> (Arc<GraphicsInstance>, Arc<GraphicsDevice>) {
    let instance = GraphicsInstance::with_backend(BackendKind::Dummy).unwrap();
    let device = instance.create_device(&DeviceRequest::new()).unwrap();
    (instance, device)
}

fn spirv_stub() -> ShaderArtifact {
    ShaderArtifact::SpirV(vec![0x0723_0203])
}

fn graphics_shader() -> ShaderSet {
    ShaderSet::new()
        .with_stage(ShaderStage::Vertex, spirv_stub())
        .with_stage(ShaderStage::Fragment, spirv_stub())
}

fn configured_surface(
    instance: &Arc<GraphicsInstance>,
    device: &Arc<GraphicsDevice>,
) -> Arc<Surface> {
    let surface = instance.create_test_surface().unwrap();
    surface
        .configure(device, &SurfaceConfiguration::new(640, 480))
        .unwrap();
    surface
}

// ============================================================================
// Resource / component semantics
// ============================================================================

/// Growing a dynamic-variable buffer preserves the old bytes and zero-fills
/// the new ones; shrinking keeps exactly the prefix. Verified on both the
/// CPU-side resource store and the backend component.
#[test]
fn buffer_resize_preserves_prefix_and_zero_fills() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    let handle = descriptor.add_resource(BufferResource::from_slice(
        &[1u32, 2, 3, 4],
        ResourceAccess::DynamicVariable,
    ));
    let mut renderer = device.create_renderer(descriptor).unwrap();

    assert_eq!(renderer.component_size(handle), 16);

    renderer
        .edit(RendererEdit::new().resize_buffer(handle, 32))
        .unwrap();

    let data = renderer.resource_data(handle).unwrap();
    let ints: &[u32] = bytemuck::cast_slice(data);
    assert_eq!(ints, &[1, 2, 3, 4, 0, 0, 0, 0]);
    assert_eq!(renderer.component_size(handle), 32);
    assert_eq!(renderer.read_component(handle).unwrap(), data.to_vec());

    renderer
        .edit(RendererEdit::new().resize_buffer(handle, 8))
        .unwrap();
    let data = renderer.resource_data(handle).unwrap();
    let ints: &[u32] = bytemuck::cast_slice(data);
    assert_eq!(ints, &[1, 2]);
    assert_eq!(renderer.component_size(handle), 8);
}

#[test]
fn resize_requires_dynamic_variable_access() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    let fixed = descriptor.add_resource(BufferResource::from_bytes(
        vec![0; 16],
        ResourceAccess::DynamicFixed,
    ));
    let mut renderer = device.create_renderer(descriptor).unwrap();

    let result = renderer.edit(RendererEdit::new().resize_buffer(fixed, 32));
    assert!(result.is_err());
    assert_eq!(renderer.component_size(fixed), 16);
}

#[test]
fn static_resources_reject_writes() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    let fixed = descriptor.add_resource(BufferResource::from_bytes(
        vec![7; 16],
        ResourceAccess::Static,
    ));
    let dynamic = descriptor.add_resource(BufferResource::from_bytes(
        vec![0; 16],
        ResourceAccess::DynamicFixed,
    ));
    let mut renderer = device.create_renderer(descriptor).unwrap();

    assert!(renderer.write_resource(fixed, 0, &[1, 2, 3, 4]).is_err());
    assert!(renderer.write_resource(dynamic, 4, &[9, 9]).is_ok());
    assert_eq!(renderer.resource_data(dynamic).unwrap()[4..6], [9, 9]);
    // The component mirrors the CPU store.
    assert_eq!(renderer.read_component(dynamic).unwrap()[4..6], [9, 9]);

    // Out-of-bounds writes are configuration errors, not truncations.
    assert!(renderer.write_resource(dynamic, 14, &[1, 2, 3]).is_err());
}

/// Image resize through a renderer edit: dimension change, prefix
/// preservation, zero fill.
#[test]
fn image_resize_through_edit() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    let image = descriptor.add_resource(
        ImageResource::from_bytes(
            vec![0xAB; 16],
            TextureFormat::Rgba8Unorm,
            Extent2d::new(2, 2),
            ResourceAccess::DynamicVariable,
        )
        .unwrap(),
    );
    let mut renderer = device.create_renderer(descriptor).unwrap();

    renderer
        .edit(RendererEdit::new().resize_image(image, Extent2d::new(2, 4)))
        .unwrap();
    let data = renderer.resource_data(image).unwrap();
    assert_eq!(data.len(), 32);
    assert!(data[..16].iter().all(|&b| b == 0xAB));
    assert!(data[16..].iter().all(|&b| b == 0));
    assert_eq!(renderer.component_size(image), 32);
}

// ============================================================================
// Binding slot derivation
// ============================================================================

/// Adding resources A then B always yields A at a lower slot than B, index
/// buffers occupy no slot, and the assignment is identical across repeated
/// builds.
#[test]
fn binding_slots_are_stable_and_ascending() {
    let build = |instance: &Arc<GraphicsInstance>, device: &Arc<GraphicsDevice>| {
        let surface = configured_surface(instance, device);
        let mut descriptor = RendererDescriptor::new()
            .with_shader(graphics_shader())
            .with_vertex_input(VertexInput::pulling())
            .with_output(Output::Surface(surface));
        let a = descriptor.add_resource(BufferResource::from_bytes(
            vec![0; 4],
            ResourceAccess::Static,
        ));
        let index = descriptor.add_resource(
            BufferResource::from_bytes(vec![0; 12], ResourceAccess::Static)
                .with_flags(ResourceFlags::INDEX),
        );
        let image = descriptor.add_resource(ImageResource::zeroed(
            TextureFormat::Rgba8Unorm,
            Extent2d::new(1, 1),
            ResourceAccess::Static,
        ));
        let b = descriptor.add_resource(BufferResource::from_bytes(
            vec![0; 8],
            ResourceAccess::DynamicFixed,
        ));
        let renderer = device.create_renderer(descriptor).unwrap();
        (
            renderer.binding_slot(a),
            renderer.binding_slot(index),
            renderer.binding_slot(image),
            renderer.binding_slot(b),
        )
    };

    let (instance, device) = test_device();
    let first = build(&instance, &device);
    let second = build(&instance, &device);

    assert_eq!(first, (Some(0), None, Some(1), Some(2)));
    assert_eq!(first, second);
}

// ============================================================================
// Swapchain configuration
// ============================================================================

/// The swapchain image count is clamped into the adapter-reported
/// [min, max] range.
#[test]
fn image_count_respects_adapter_range() {
    let (instance, device) = test_device();
    let caps = instance.enumerate_adapters()[0]
        .surface_caps
        .clone()
        .unwrap();

    let surface = instance.create_test_surface().unwrap();
    surface
        .configure(
            &device,
            &SurfaceConfiguration::new(640, 480).with_min_image_count(100),
        )
        .unwrap();
    let count = surface.image_count().unwrap();
    assert!(count >= caps.min_image_count);
    assert!(count <= caps.max_image_count);

    surface
        .configure(
            &device,
            &SurfaceConfiguration::new(640, 480).with_min_image_count(1),
        )
        .unwrap();
    assert_eq!(surface.image_count().unwrap(), caps.min_image_count);
}

#[test]
fn zero_sized_surface_is_rejected() {
    let (instance, device) = test_device();
    let surface = instance.create_test_surface().unwrap();
    let result = surface.configure(&device, &SurfaceConfiguration::new(0, 480));
    assert!(result.is_err());
}

// ============================================================================
// Frame loop
// ============================================================================

/// Ten frames with two frames in flight: after the pipeline fills, each
/// frame blocks on at most one fence wait, and the simulated fences assert
/// that no fence is reset before its pending submission was waited on.
#[test]
fn steady_state_frame_loop_blocks_once_per_frame() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    descriptor.add_resource(BufferResource::from_bytes(
        vec![0; 64],
        ResourceAccess::DynamicFixed,
    ));
    let mut renderer = device.create_renderer(descriptor).unwrap();

    for frame in 0u64..10 {
        let report = renderer.render_vertices(3).unwrap();
        assert!(!report.suboptimal);
        let stats = renderer.frame_stats().unwrap();
        assert_eq!(stats.frames, frame + 1);
        assert!(
            stats.last_frame_blocking_waits <= 1,
            "frame {frame} blocked {} times",
            stats.last_frame_blocking_waits
        );
    }

    let stats = renderer.frame_stats().unwrap();
    assert_eq!(stats.frames, 10);
    assert!(stats.max_blocking_waits_per_frame <= 1);
    // The first FRAMES_IN_FLIGHT frames reuse initially-signalled fences.
    assert!(stats.blocking_fence_waits <= 10 - FRAMES_IN_FLIGHT as u64);
}

/// Rendering against an unconfigured surface is a recoverable error, not a
/// panic.
#[test]
fn render_on_unconfigured_surface_fails() {
    let (instance, device) = test_device();
    let surface = instance.create_test_surface().unwrap();

    let descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    let mut renderer = device.create_renderer(descriptor).unwrap();
    assert!(renderer.render().is_err());
}

// ============================================================================
// Offscreen and compute renderers
// ============================================================================

/// An offscreen renderer needs no surface; the output image's tracked
/// layout advances exactly at render-pass exit.
#[test]
fn offscreen_renderer_advances_image_layout() {
    let (_instance, device) = test_device();

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling());
    let target = descriptor.add_resource(
        ImageResource::zeroed(
            TextureFormat::Rgba8Unorm,
            Extent2d::new(64, 64),
            ResourceAccess::Static,
        )
        .with_flags(ResourceFlags::RENDER_OUTPUT),
    );
    descriptor.set_output(Output::Offscreen(target));
    let mut renderer = device.create_renderer(descriptor).unwrap();

    assert_eq!(renderer.image_layout(target), Some(ImageLayout::Undefined));
    assert_eq!(
        renderer.output_dimensions(),
        Some(Extent2d::new(64, 64))
    );

    renderer.render_vertices(3).unwrap();
    assert_eq!(
        renderer.image_layout(target),
        Some(ImageLayout::ColorAttachment)
    );
}

#[test]
fn offscreen_output_requires_render_output_flag() {
    let (_instance, device) = test_device();

    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling());
    let target = descriptor.add_resource(ImageResource::zeroed(
        TextureFormat::Rgba8Unorm,
        Extent2d::new(64, 64),
        ResourceAccess::Static,
    ));
    descriptor.set_output(Output::Offscreen(target));
    assert!(device.create_renderer(descriptor).is_err());
}

/// Compute renderers run without an output target and honor the blocking
/// option through the submit-and-wait path.
#[test]
fn compute_renderer_dispatches() {
    let (_instance, device) = test_device();

    let mut descriptor = RendererDescriptor::new()
        .with_shader(ShaderSet::new().with_stage(ShaderStage::Compute, spirv_stub()));
    descriptor.add_resource(BufferResource::from_bytes(
        vec![0; 256],
        ResourceAccess::DynamicFixed,
    ));
    descriptor.state_mut().compute_kernel = [8, 8, 1];
    descriptor.state_mut().blocking_compute = true;
    let mut renderer = device.create_renderer(descriptor).unwrap();

    assert!(renderer.is_compute());
    renderer.render().unwrap();
    renderer.render().unwrap();
    let stats = renderer.frame_stats().unwrap();
    assert_eq!(stats.frames, 2);

    // Kernel edits go through the renderer edit path.
    renderer
        .edit(RendererEdit::new().set_compute_kernel([4, 4, 4]))
        .unwrap();
    assert_eq!(renderer.state().compute_kernel, [4, 4, 4]);
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn graphics_renderer_requires_shader_stages() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    // Vertex stage alone is not a valid graphics shader.
    let descriptor = RendererDescriptor::new()
        .with_shader(ShaderSet::new().with_stage(ShaderStage::Vertex, spirv_stub()))
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    assert!(device.create_renderer(descriptor).is_err());

    // No shader at all.
    let descriptor = RendererDescriptor::new().with_vertex_input(VertexInput::pulling());
    assert!(device.create_renderer(descriptor).is_err());
}

#[test]
fn graphics_renderer_requires_vertex_input_and_output() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    let descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_output(Output::Surface(Arc::clone(&surface)));
    assert!(device.create_renderer(descriptor).is_err());

    let descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling());
    assert!(device.create_renderer(descriptor).is_err());
}

#[test]
fn invalid_resource_flag_combinations_are_rejected() {
    let (instance, device) = test_device();
    let surface = configured_surface(&instance, &device);

    // RENDER_OUTPUT on a buffer.
    let mut descriptor = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface));
    descriptor.add_resource(
        BufferResource::from_bytes(vec![0; 4], ResourceAccess::Static)
            .with_flags(ResourceFlags::RENDER_OUTPUT),
    );
    assert!(device.create_renderer(descriptor).is_err());
}

// ============================================================================
// Referenced resources
// ============================================================================

/// A renderer can reference a component owned by another renderer; the
/// referencing renderer shares the allocation and cannot edit it.
#[test]
fn referenced_components_are_shared() {
    let (instance, device) = test_device();

    let surface_a = configured_surface(&instance, &device);
    let mut descriptor_a = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface_a));
    let owned = descriptor_a.add_resource(BufferResource::from_slice(
        &[11u32, 22, 33],
        ResourceAccess::DynamicFixed,
    ));
    let mut renderer_a = device.create_renderer(descriptor_a).unwrap();

    let surface_b = configured_surface(&instance, &device);
    let mut descriptor_b = RendererDescriptor::new()
        .with_shader(graphics_shader())
        .with_vertex_input(VertexInput::pulling())
        .with_output(Output::Surface(surface_b));
    let referenced = descriptor_b.ref_resource(&renderer_a, owned);
    let mut renderer_b = device.create_renderer(descriptor_b).unwrap();

    // Same backing component, same contents.
    assert_eq!(
        renderer_b.read_component(referenced).unwrap(),
        renderer_a.read_component(owned).unwrap()
    );

    // Writes through the owner are visible through the reference.
    renderer_a.write_resource(owned, 0, &[0xFF; 4]).unwrap();
    assert_eq!(renderer_b.read_component(referenced).unwrap()[..4], [0xFF; 4]);

    // The reference cannot write or edit.
    assert!(renderer_b.write_resource(referenced, 0, &[0; 4]).is_err());
    assert!(renderer_b
        .edit(RendererEdit::new().resize_buffer(referenced, 64))
        .is_err());
}
