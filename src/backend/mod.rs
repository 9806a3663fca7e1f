//! Backend dispatch layer.
//!
//! One logical API is realized by structurally different native APIs. The
//! two real backends differ too deeply (explicit vs. implicit
//! synchronization) to share a vtable cleanly, so dispatch is a tagged
//! union selected once at instance creation: every backend-facing object is
//! an enum with one `#[cfg]`-gated variant per compiled-in backend, and the
//! front-end matches on the tag. Runtime backend switching does not exist.

#[cfg(feature = "dummy")]
pub(crate) mod dummy;

#[cfg(feature = "vulkan-backend")]
pub(crate) mod vulkan;

#[cfg(feature = "wgpu-backend")]
pub(crate) mod wgpu_impl;

use std::sync::Arc;

use crate::error::RenderError;
use crate::hardware::AdapterInfo;
use crate::resource::Resource;

/// The kind of backend executing the front-end API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Explicit, synchronization-heavy backend (Vulkan via ash).
    Vulkan,
    /// Implicit, driver-managed backend (wgpu).
    Wgpu,
    /// Simulation backend for tests and headless development.
    Dummy,
}

/// Backend context state, created once per [`crate::GraphicsInstance`].
pub(crate) enum BackendContext {
    #[cfg(feature = "dummy")]
    Dummy(dummy::DummyContext),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanContext),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu_impl::WgpuContext),
}

impl BackendContext {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "dummy")]
            Self::Dummy(_) => BackendKind::Dummy,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => BackendKind::Wgpu,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "dummy")]
            Self::Dummy(ctx) => ctx.name(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(ctx) => ctx.name(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(ctx) => ctx.name(),
        }
    }

    pub(crate) fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        match self {
            #[cfg(feature = "dummy")]
            Self::Dummy(ctx) => ctx.enumerate_adapters(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(ctx) => ctx.enumerate_adapters(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(ctx) => ctx.enumerate_adapters(),
        }
    }
}

/// Select and create a backend context.
///
/// With no explicit kind the real backends are tried in order and the dummy
/// backend is the fallback, mirroring how the hardware backends degrade on
/// machines without GPU support.
pub(crate) fn create_context(kind: Option<BackendKind>) -> Result<BackendContext, RenderError> {
    if let Some(kind) = kind {
        return match kind {
            #[cfg(feature = "vulkan-backend")]
            BackendKind::Vulkan => Ok(BackendContext::Vulkan(vulkan::VulkanContext::new()?)),
            #[cfg(feature = "wgpu-backend")]
            BackendKind::Wgpu => Ok(BackendContext::Wgpu(wgpu_impl::WgpuContext::new()?)),
            #[cfg(feature = "dummy")]
            BackendKind::Dummy => Ok(BackendContext::Dummy(dummy::DummyContext::new())),
            #[allow(unreachable_patterns)]
            other => Err(RenderError::BackendUnavailable(format!(
                "backend {other:?} is not compiled in"
            ))),
        };
    }

    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanContext::new() {
            Ok(ctx) => {
                log::info!("Using Vulkan backend (ash)");
                return Ok(BackendContext::Vulkan(ctx));
            }
            Err(e) => log::warn!("Failed to create Vulkan backend: {e}"),
        }
    }

    #[cfg(feature = "wgpu-backend")]
    {
        match wgpu_impl::WgpuContext::new() {
            Ok(ctx) => {
                log::info!("Using wgpu backend");
                return Ok(BackendContext::Wgpu(ctx));
            }
            Err(e) => log::warn!("Failed to create wgpu backend: {e}"),
        }
    }

    #[cfg(feature = "dummy")]
    {
        log::info!("Using dummy backend");
        return Ok(BackendContext::Dummy(dummy::DummyContext::new()));
    }

    #[allow(unreachable_code)]
    Err(RenderError::BackendUnavailable(
        "no backend compiled in".to_string(),
    ))
}

/// Backend half of a logical device.
pub(crate) enum DeviceBackend {
    #[cfg(feature = "dummy")]
    Dummy(dummy::DummyDevice),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanDevice),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu_impl::WgpuDevice),
}

impl DeviceBackend {
    pub(crate) fn wait_idle(&self) {
        match self {
            #[cfg(feature = "dummy")]
            Self::Dummy(d) => d.wait_idle(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(d) => d.wait_idle(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(d) => d.wait_idle(),
        }
    }
}

/// Backend half of a window surface.
pub(crate) enum SurfaceBackend {
    #[cfg(feature = "dummy")]
    Dummy(dummy::DummySurface),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanSurface),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu_impl::WgpuSurface),
}

/// Backend half of a renderer.
pub(crate) enum RendererBackend {
    #[cfg(feature = "dummy")]
    Dummy(dummy::DummyRenderer),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanRenderer),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu_impl::WgpuRenderer),
}

/// Shared handle to a backend-native component, used when one renderer
/// references a component owned by another. The referenced component must
/// outlive the reference; this is a documented precondition, not enforced.
#[derive(Clone)]
pub(crate) enum ComponentRef {
    #[cfg(feature = "dummy")]
    Dummy(Arc<dummy::DummyComponent>),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(Arc<vulkan::VulkanComponent>),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_impl::WgpuComponent>),
}

impl std::fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "dummy")]
            Self::Dummy(_) => write!(f, "ComponentRef::Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => write!(f, "ComponentRef::Vulkan"),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => write!(f, "ComponentRef::Wgpu"),
        }
    }
}

/// Where a renderer entry's component comes from at build time.
pub(crate) enum ComponentSource<'a> {
    /// Realize a new component from this resource.
    Owned(&'a Resource),
    /// Reuse a component owned elsewhere.
    Referenced(ComponentRef),
}
