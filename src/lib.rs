//! # render-core
//!
//! Cross-backend GPU rendering core: one front-end API realized on top of
//! two structurally different native graphics APIs — an explicit,
//! synchronization-heavy backend (Vulkan via `ash`) and an implicit,
//! driver-managed backend (`wgpu`) — plus a `dummy` simulation backend for
//! tests and headless development.
//!
//! ## Overview
//!
//! - [`GraphicsInstance`] — the context object; enumerates adapters,
//!   creates devices and surfaces
//! - [`GraphicsDevice`] — a negotiated logical device with validated
//!   features, extensions and queues
//! - [`Resource`] — a backend-agnostic recipe for GPU-resident data,
//!   realized per device as a native component
//! - [`Renderer`] — binds a shader, resources and an output, and draws
//! - [`Surface`] — the presentable image chain tied to a window
//!
//! ## Example
//!
//! ```
//! use render_core::{
//!     BackendKind, DeviceRequest, GraphicsInstance, RendererDescriptor, Output,
//!     ShaderArtifact, ShaderSet, ShaderStage, VertexInput,
//! };
//!
//! let instance = GraphicsInstance::with_backend(BackendKind::Dummy).unwrap();
//! let device = instance.create_device(&DeviceRequest::new()).unwrap();
//!
//! let surface = instance.create_test_surface().unwrap();
//! surface
//!     .configure(&device, &render_core::SurfaceConfiguration::new(640, 480))
//!     .unwrap();
//!
//! let descriptor = RendererDescriptor::new()
//!     .with_shader(
//!         ShaderSet::new()
//!             .with_stage(ShaderStage::Vertex, ShaderArtifact::SpirV(vec![0x0723_0203]))
//!             .with_stage(ShaderStage::Fragment, ShaderArtifact::SpirV(vec![0x0723_0203])),
//!     )
//!     .with_vertex_input(VertexInput::pulling())
//!     .with_output(Output::Surface(surface));
//! let mut renderer = device.create_renderer(descriptor).unwrap();
//! renderer.render_vertices(3).unwrap();
//! ```

pub mod backend;
pub mod command;
pub mod device;
pub mod error;
pub mod frame;
pub mod hardware;
pub mod instance;
pub mod output;
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod swapchain;
pub mod types;

// Re-export the main types for convenience.
pub use backend::BackendKind;
pub use command::{CommandBufferState, CommandStateMachine, ImageLayout};
pub use device::{GraphicsDevice, Queue};
pub use error::{AcquireError, RenderError};
pub use frame::FRAMES_IN_FLIGHT;
pub use hardware::{
    AdapterInfo, AdapterType, AdapterVendor, DeviceExtensions, DeviceFeatures, QueueCaps,
    SurfaceCaps,
};
pub use instance::{DeviceRequest, GraphicsInstance};
pub use output::Output;
pub use renderer::{
    FrameReport, FrameStats, RenderState, Renderer, RendererDescriptor, RendererEdit,
    VertexAttribute, VertexFormat, VertexInput,
};
pub use resource::{
    BufferResource, ImageResource, Resource, ResourceAccess, ResourceFlags, ResourceHandle,
};
pub use shader::{BindingKind, ShaderArtifact, ShaderBinding, ShaderSet, ShaderStage};
pub use swapchain::{AcquiredImage, PresentMode, Surface, SurfaceConfiguration};
pub use types::{
    BlendMode, BufferDescriptor, BufferUsage, CompareFunction, CullMode, Extent2d, FilterMode,
    PrimitiveTopology, TextureDescriptor, TextureFormat, TextureUsage, WrapMode,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// The public handle types are shareable across threads.
static_assertions::assert_impl_all!(error::RenderError: Send, Sync);
static_assertions::assert_impl_all!(hardware::AdapterInfo: Send, Sync);
static_assertions::assert_impl_all!(resource::Resource: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
